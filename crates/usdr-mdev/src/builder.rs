//! MultiDeviceBuilder -- assembles physical devices into one [`MultiDevice`].
//!
//! # Example
//!
//! ```no_run
//! use usdr_core::Device;
//! use usdr_mdev::MultiDeviceBuilder;
//!
//! # async fn example(a: Box<dyn Device>, b: Box<dyn Device>) -> usdr_core::Result<()> {
//! let array = MultiDeviceBuilder::new()
//!     .name("array0")
//!     .device(a)
//!     .device(b)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use tracing::{info, warn};

use usdr_core::{Device, Error, Result, StreamDirection};

use crate::device::MultiDevice;

/// Largest number of physical devices in one array.
pub const MAX_DEVICES: usize = 32;

/// Fluent builder for [`MultiDevice`].
#[derive(Default)]
pub struct MultiDeviceBuilder {
    name: Option<String>,
    devices: Vec<Box<dyn Device>>,
}

impl MultiDeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported by the virtual device (default: `"mdev"`).
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Append one physical device. Index 0 is the master.
    pub fn device(mut self, device: Box<dyn Device>) -> Self {
        self.devices.push(device);
        self
    }

    pub fn devices(mut self, devices: impl IntoIterator<Item = Box<dyn Device>>) -> Self {
        self.devices.extend(devices);
        self
    }

    /// Validate the device set and take ownership of it.
    ///
    /// Every device must report the same UUID. On any validation failure
    /// all supplied devices are destroyed before the error is returned.
    pub async fn build(self) -> Result<MultiDevice> {
        let name = self.name.unwrap_or_else(|| "mdev".to_string());
        let mut devices = self.devices;

        if devices.is_empty() {
            return Err(Error::InvalidArgument(format!("{name}: no devices")));
        }
        if devices.len() > MAX_DEVICES {
            let count = devices.len();
            destroy_all(&name, &mut devices).await;
            return Err(Error::InvalidArgument(format!(
                "{name}: {count} devices, at most {MAX_DEVICES} supported"
            )));
        }

        let uuid = devices[0].uuid();
        if let Some(odd) = devices.iter().position(|d| d.uuid() != uuid) {
            warn!(
                array = %name,
                device = devices[odd].name(),
                index = odd,
                "device identity differs from the master"
            );
            let odd_name = devices[odd].name().to_string();
            destroy_all(&name, &mut devices).await;
            return Err(Error::NoDevice(format!(
                "{name}: {odd_name} does not match the master device identity"
            )));
        }

        let channels = [
            devices[0].channel_count(StreamDirection::Rx),
            devices[0].channel_count(StreamDirection::Tx),
        ];
        info!(
            array = %name,
            devices = devices.len(),
            rx_channels = channels[0],
            tx_channels = channels[1],
            "device array created"
        );

        Ok(MultiDevice::new(name, uuid, channels, devices))
    }
}

async fn destroy_all(name: &str, devices: &mut [Box<dyn Device>]) {
    for dev in devices.iter_mut() {
        if let Err(e) = dev.destroy().await {
            warn!(array = %name, device = dev.name(), error = %e, "device destroy failed");
        }
    }
}
