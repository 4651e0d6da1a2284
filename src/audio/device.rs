//! Output device enumeration

use cpal::traits::{DeviceTrait, HostTrait};

/// Rates a click stream is usually opened at
const CLICK_SAMPLE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

/// Output device identifier (its cpal name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

/// An output device clicks can be played on
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub name: String,
    /// Sample rate of the device's default stream config
    pub default_sample_rate: Option<u32>,
    /// Click sample rates the device accepts
    pub supported_sample_rates: Vec<u32>,
    /// Largest supported channel count
    pub max_channels: u16,
    pub is_default: bool,
}

/// List playback devices of the default host
pub fn list_output_devices() -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            Some(describe(&device, name.clone(), default_name.as_ref() == Some(&name)))
        })
        .collect()
}

fn describe(device: &cpal::Device, name: String, is_default: bool) -> AudioDevice {
    let default_sample_rate = device
        .default_output_config()
        .ok()
        .map(|config| config.sample_rate().0);

    let mut supported_sample_rates = Vec::new();
    let mut max_channels = 0;
    for range in device.supported_output_configs().into_iter().flatten() {
        max_channels = max_channels.max(range.channels());
        for rate in CLICK_SAMPLE_RATES {
            if (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&rate)
                && !supported_sample_rates.contains(&rate)
            {
                supported_sample_rates.push(rate);
            }
        }
    }
    supported_sample_rates.sort_unstable();

    AudioDevice {
        id: DeviceId(name.clone()),
        name,
        default_sample_rate,
        supported_sample_rates,
        max_channels,
        is_default,
    }
}

/// Find an output device by id, or the host default
pub(crate) fn find_output_device(device_id: Option<&DeviceId>) -> Option<cpal::Device> {
    let host = cpal::default_host();
    match device_id {
        Some(id) => host
            .output_devices()
            .ok()?
            .find(|d| d.name().ok().as_ref() == Some(&id.0)),
        None => host.default_output_device(),
    }
}
