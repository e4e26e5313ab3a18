//! Discovery of the heater behind a C.MI controller.

use crate::connection::Api;
use crate::error::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Device type code of the C.MI controller itself. It lists itself among its devices.
pub const CONTROLLER_DEVICE_TYPE: u32 = 65;

/// Ids above this are module slots on the controller's bus.
const MODULE_ID_BASE: u32 = 100;

const DEVICE_TYPES: [(u32, &str); 5] = [
    (18, "EKD.M3 electric boiler"),
    (19, "EKCO.M3 electric boiler"),
    (21, "EPO/EPV electric boiler"),
    (48, "ZBT buffer tank controller"),
    (CONTROLLER_DEVICE_TYPE, "C.MI controller"),
];

/// Everything needed to address a device in register reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeviceAddress {
    pub id: u32,
    pub device_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct DeviceDescriptor {
    pub id: u32,
    pub device_type: u32,
    pub label: String,
    /// The controller's module number for ids in the module range.
    pub module: Option<u32>,
}

impl DeviceDescriptor {
    fn new(id: u32, device_type: u32, name: Option<&str>) -> Self {
        let label = match DEVICE_TYPES.iter().find(|(code, _)| *code == device_type) {
            Some((_, label)) => label.to_string(),
            None => match name {
                Some(name) if !name.trim().is_empty() => name.trim().to_string(),
                _ => format!("device type {device_type}"),
            },
        };
        let module = (id > MODULE_ID_BASE).then(|| id - MODULE_ID_BASE);
        Self { id, device_type, label, module }
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress { id: self.id, device_type: self.device_type }
    }
}

/// Numbers arrive as JSON numbers or as numeric strings, depending on firmware.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Code {
    Number(u32),
    Text(String),
}

impl Code {
    fn value(&self) -> Result<u32, serde_json::Error> {
        match self {
            Code::Number(n) => Ok(*n),
            Code::Text(s) => s.trim().parse().map_err(|_| {
                <serde_json::Error as serde::de::Error>::custom(format!("`{s}` is not a number"))
            }),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ListedDevice {
    id: Code,
    #[serde(default, rename = "type", alias = "devType", alias = "device_type")]
    device_type: Option<Code>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum OneOrMany {
    One(ListedDevice),
    Many(Vec<ListedDevice>),
}

/// The two shapes of `devs` seen in the wild.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Listing {
    /// `{"<type code>": device or [devices]}`
    ByType(BTreeMap<String, OneOrMany>),
    /// `[{"type": <type code>, "id": <id>}]`
    Flat(Vec<ListedDevice>),
}

/// Normalize a `devs` listing into a sorted list of heater devices, the controller excluded.
pub fn parse_listing(devs: serde_json::Value) -> Result<Vec<DeviceDescriptor>, Error> {
    let listing = Listing::deserialize(devs).map_err(Error::UnrecognizedListing)?;
    let mut devices = Vec::new();
    let mut push = |device: &ListedDevice, device_type: u32| -> Result<(), Error> {
        let id = device.id.value().map_err(Error::UnrecognizedListing)?;
        devices.push(DeviceDescriptor::new(id, device_type, device.name.as_deref()));
        Ok(())
    };
    match listing {
        Listing::ByType(map) => {
            for (code, entry) in map {
                let device_type = Code::Text(code).value().map_err(Error::UnrecognizedListing)?;
                match entry {
                    OneOrMany::One(device) => push(&device, device_type)?,
                    OneOrMany::Many(many) => {
                        for device in &many {
                            push(device, device_type)?;
                        }
                    }
                }
            }
        }
        Listing::Flat(list) => {
            for device in &list {
                let Some(code) = &device.device_type else {
                    let e = <serde_json::Error as serde::de::Error>::missing_field("type");
                    return Err(Error::UnrecognizedListing(e));
                };
                let device_type = code.value().map_err(Error::UnrecognizedListing)?;
                push(device, device_type)?;
            }
        }
    }
    devices.retain(|d| d.device_type != CONTROLLER_DEVICE_TYPE);
    devices.sort();
    devices.dedup();
    Ok(devices)
}

/// Pick the device to talk to out of a listing.
///
/// With `wanted` set, only that device id is acceptable. Otherwise the first device is used.
pub fn choose(devices: &[DeviceDescriptor], wanted: Option<u32>) -> Result<DeviceAddress, Error> {
    if let Some(id) = wanted {
        return devices
            .iter()
            .find(|d| d.id == id)
            .map(DeviceDescriptor::address)
            .ok_or(Error::DeviceNotListed(id));
    }
    let first = devices.first().ok_or(Error::NoDevice)?;
    if devices.len() > 1 {
        warn!(
            message = "multiple devices found, using the first one",
            id = first.id,
            device_type = first.device_type,
            count = devices.len()
        );
    }
    Ok(first.address())
}

pub async fn list_devices(api: &Api) -> Result<Vec<DeviceDescriptor>, Error> {
    let devs = api.device_listing().await?;
    let devices = parse_listing(devs)?;
    debug!(message = "listed devices", count = devices.len());
    Ok(devices)
}

/// Discover the address of the configured (or the only) heater.
pub async fn resolve_address(api: &Api) -> Result<DeviceAddress, Error> {
    let config = api.config();
    if let Some(address) = config.pinned_address() {
        return Ok(address);
    }
    let devices = list_devices(api).await.map_err(|e| match e.kind() {
        crate::ErrorKind::Discovery => e,
        _ => Error::Discovery(Box::new(e)),
    })?;
    let address = choose(&devices, config.device_id)?;
    debug!(message = "resolved device", id = address.id, device_type = address.device_type);
    Ok(address)
}
