use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

use vstream_foundation::AudioError;

/// Summary of one input device for CLI listings.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub max_channels: u16,
    pub default_sample_rate: u32,
}

pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    /// Open the input device at `index`, or the host default when `None`.
    pub fn open_input(&self, index: Option<usize>) -> Result<Device, AudioError> {
        match index {
            Some(i) => {
                let mut devices = self.host.input_devices()?;
                devices
                    .nth(i)
                    .ok_or(AudioError::DeviceNotFound { index: Some(i) })
            }
            None => self
                .host
                .default_input_device()
                .ok_or(AudioError::NoDevices),
        }
    }

    /// Enumerate input devices with their index as used by `open_input`.
    pub fn enumerate(&self) -> Vec<DeviceInfo> {
        let default_name = self
            .host
            .default_input_device()
            .and_then(|d| d.name().ok());

        let mut out = Vec::new();
        let Ok(devices) = self.host.input_devices() else {
            return out;
        };

        for (index, device) in devices.enumerate() {
            let Ok(name) = device.name() else { continue };
            let Ok(config) = device.default_input_config() else {
                continue;
            };
            out.push(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_channels: config.channels(),
                default_sample_rate: config.sample_rate().0,
            });
        }
        out
    }
}
