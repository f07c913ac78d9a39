//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
}

/// Index of the device matching `preferred`: exact (case-insensitive) name
/// first, then the first name containing it.
pub fn resolve_preference(names: &[String], preferred: &str) -> Option<usize> {
    let wanted = preferred.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    names
        .iter()
        .position(|n| n.to_lowercase() == wanted)
        .or_else(|| names.iter().position(|n| n.to_lowercase().contains(&wanted)))
}

/// List devices for one direction, default first.
///
/// Returns an empty `Vec` if cpal is not available or enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };

    let devices = match devices {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(?direction, "failed to enumerate devices: {e}");
            return default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        direction,
                        is_default: true,
                    }]
                })
                .unwrap_or_default();
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .iter()
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo {
                name,
                direction,
                is_default,
            }
        })
        .collect();
    list.sort_by_key(|d| (!d.is_default, d.name.to_lowercase()));
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices(_direction: DeviceDirection) -> Vec<DeviceInfo> {
    vec![]
}

/// Pick a device by preferred name, otherwise the default device, otherwise
/// the first one available.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_device(
    host: &cpal::Host,
    direction: DeviceDirection,
    preferred: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    use crate::error::RealtimeError;

    let enumerate = || -> crate::error::Result<Vec<cpal::Device>> {
        let devices = match direction {
            DeviceDirection::Input => host.input_devices().map(|d| d.collect()),
            DeviceDirection::Output => host.output_devices().map(|d| d.collect()),
        };
        devices.map_err(|e| RealtimeError::AudioDevice(e.to_string()))
    };

    if let Some(preferred) = preferred {
        match enumerate() {
            Ok(mut devices) => {
                let names: Vec<String> = devices
                    .iter()
                    .map(|d| d.name().unwrap_or_default())
                    .collect();
                if let Some(idx) = resolve_preference(&names, preferred) {
                    return Ok(devices.swap_remove(idx));
                }
                tracing::warn!(preferred, ?direction, "preferred device not found, falling back");
            }
            Err(e) => tracing::warn!("failed to list devices while resolving preference: {e}"),
        }
    }

    let default = match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    };
    if let Some(device) = default {
        return Ok(device);
    }

    let missing = match direction {
        DeviceDirection::Input => RealtimeError::NoDefaultInputDevice,
        DeviceDirection::Output => RealtimeError::NoDefaultOutputDevice,
    };
    let fallback = enumerate()?.into_iter().next().ok_or(missing)?;
    tracing::warn!(?direction, "no default device, falling back to first available");
    Ok(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_beats_substring() {
        let list = names(&["USB Microphone Pro", "USB Microphone"]);
        assert_eq!(resolve_preference(&list, "usb microphone"), Some(1));
    }

    #[test]
    fn substring_match_is_fallback() {
        let list = names(&["Built-in Output", "Headphones (USB)"]);
        assert_eq!(resolve_preference(&list, "headphones"), Some(1));
        assert_eq!(resolve_preference(&list, "hdmi"), None);
        assert_eq!(resolve_preference(&list, "  "), None);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let info = DeviceInfo {
            name: "Mic".into(),
            direction: DeviceDirection::Input,
            is_default: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["direction"], "input");
    }
}
