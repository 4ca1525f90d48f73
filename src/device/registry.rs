//! Maps the `type` key of a device entry to its factory.

use super::Device;
use super::dimmer::DimmerActor;
use super::opening::OpeningSensor;
use super::relay::RelayActor;
use super::scene::SceneActor;
use super::shutter::ShutterActor;
use super::two_channel::TwoChannelActor;
use crate::config::DeviceConfig;
use crate::error::ConfigError;
use log::{error, info};
use std::collections::HashMap;

pub type DeviceFactory = fn(&DeviceConfig) -> Result<Box<dyn Device>, ConfigError>;

fn boxed<D: Device + 'static>(device: Result<D, ConfigError>) -> Result<Box<dyn Device>, ConfigError> {
    device.map(|d| Box::new(d) as Box<dyn Device>)
}

pub struct DeviceRegistry {
    factories: HashMap<&'static str, DeviceFactory>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl DeviceRegistry {
    /// Registry without any device types.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with all built-in device types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("fsr61", |c| boxed(RelayActor::from_config(c)));
        registry.register("fud61", |c| boxed(DimmerActor::from_config(c)));
        registry.register("fsb61", |c| boxed(ShutterActor::from_config(c)));
        registry.register("fsr14_2x", |c| boxed(TwoChannelActor::from_config(c)));
        registry.register("ffg7b", |c| boxed(OpeningSensor::handle(c)));
        registry.register("ftke", |c| boxed(OpeningSensor::contact(c)));
        registry.register("scene", |c| boxed(SceneActor::from_config(c)));
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: DeviceFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, config: &DeviceConfig) -> Result<Box<dyn Device>, ConfigError> {
        let kind = config.kind.trim().to_lowercase();
        let factory = self
            .factories
            .get(kind.as_str())
            .ok_or_else(|| ConfigError::UnknownType {
                device: config.name.clone(),
                kind: config.kind.clone(),
            })?;
        factory(config)
    }

    /// Create every configured device. Broken entries are logged and skipped.
    pub fn create_all(&self, configs: &[DeviceConfig]) -> Vec<Box<dyn Device>> {
        let mut devices = Vec::with_capacity(configs.len());
        for config in configs {
            match self.create(config) {
                Ok(device) => {
                    info!("Configured device '{}' ({})", config.name, config.kind);
                    devices.push(device);
                }
                Err(e) => error!("Skipping device: {}", e),
            }
        }
        devices
    }
}
