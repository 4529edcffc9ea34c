//! Device objects (spec §3): interior-ish nodes DKMS hangs off a driver.

use crate::object::ObjectId;

#[derive(Debug, Clone)]
pub struct DeviceObject {
    pub driver_back_ptr: ObjectId,
    pub next_device: Option<ObjectId>,
    pub name: String,
    /// Driver-private scratch data; opaque to the Object Manager and PM.
    pub device_extension: Vec<u8>,
    pub flags: u32,
    pub registry_path: Option<String>,
}

impl DeviceObject {
    pub fn new(driver_back_ptr: ObjectId, name: &str) -> Self {
        DeviceObject {
            driver_back_ptr,
            next_device: None,
            name: name.to_string(),
            device_extension: Vec::new(),
            flags: 0,
            registry_path: None,
        }
    }
}
