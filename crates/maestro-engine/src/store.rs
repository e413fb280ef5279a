/*!
 * Read access to devices and activities.
 *
 * Persistence lives outside this crate; the engine only needs the two read
 * traits below. [`InMemoryStore`] backs them with maps and can be filled from
 * a TOML catalog holding `[[devices]]` and `[[activities]]` tables.
 */
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use maestro_core::types::Id;
use maestro_devices::Device;

use crate::activity::Activity;
use crate::error::{Error, Result};

/// Source of activity definitions
#[async_trait]
pub trait ActivityStore: Send + Sync + Debug {
    /// Fetch an activity by id
    async fn get_activity(&self, id: &Id) -> Result<Option<Activity>>;

    /// Every known activity
    async fn list_activities(&self) -> Result<Vec<Activity>>;
}

/// Source of device definitions
#[async_trait]
pub trait DeviceStore: Send + Sync + Debug {
    /// Fetch a device by id
    async fn get_device(&self, id: &Id) -> Result<Option<Device>>;

    /// Every known device
    async fn list_devices(&self) -> Result<Vec<Device>>;
}

/// Devices and activities as written in a catalog file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Known devices
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Known activities
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl Catalog {
    /// Parse a catalog; unrelated top-level tables are ignored
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let catalog: Catalog = toml::from_str(text)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read and parse a catalog file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading catalog from {}", path.display());
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::store(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check id uniqueness and that every step targets a known device
    pub fn validate(&self) -> Result<()> {
        let mut device_ids = HashSet::new();
        for device in &self.devices {
            if !device_ids.insert(&device.id) {
                return Err(Error::validation(format!("Duplicate device id {}", device.id)));
            }
        }

        let mut activity_ids = HashSet::new();
        for activity in &self.activities {
            if !activity_ids.insert(activity.id()) {
                return Err(Error::validation(format!("Duplicate activity id {}", activity.id())));
            }
            if let Some(step) = activity.steps().iter().find(|s| !device_ids.contains(&s.device_id)) {
                return Err(Error::validation(format!(
                    "Activity '{}' step {} targets unknown device {}",
                    activity.name(),
                    step.sort_order,
                    step.device_id
                )));
            }
        }
        Ok(())
    }
}

/// Map-backed implementation of both stores
#[derive(Debug, Default)]
pub struct InMemoryStore {
    devices: RwLock<HashMap<Id, Device>>,
    activities: RwLock<HashMap<Id, Activity>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a validated catalog
    pub fn from_catalog(catalog: Catalog) -> Result<Self> {
        catalog.validate()?;
        info!(
            "Catalog holds {} devices and {} activities",
            catalog.devices.len(),
            catalog.activities.len()
        );
        Ok(Self {
            devices: RwLock::new(catalog.devices.into_iter().map(|d| (d.id.clone(), d)).collect()),
            activities: RwLock::new(
                catalog
                    .activities
                    .into_iter()
                    .map(|a| (a.id().clone(), a))
                    .collect(),
            ),
        })
    }

    /// Add or replace a device
    pub async fn insert_device(&self, device: Device) {
        self.devices.write().await.insert(device.id.clone(), device);
    }

    /// Add or replace an activity
    pub async fn insert_activity(&self, activity: Activity) {
        self.activities.write().await.insert(activity.id().clone(), activity);
    }
}

#[async_trait]
impl ActivityStore for InMemoryStore {
    async fn get_activity(&self, id: &Id) -> Result<Option<Activity>> {
        Ok(self.activities.read().await.get(id).cloned())
    }

    async fn list_activities(&self) -> Result<Vec<Activity>> {
        let mut activities: Vec<_> = self.activities.read().await.values().cloned().collect();
        activities.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(activities)
    }
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn get_device(&self, id: &Id) -> Result<Option<Device>> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<_> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use maestro_devices::{CommandType, ConnectionType};

    use super::*;

    const CATALOG: &str = r#"
[general]
app_name = "maestro"

[[devices]]
id = "tv"
name = "Living Room TV"
device_type = "tv"
connection_type = "adb"
connection = { host = "192.168.1.20" }

[[devices]]
id = "roku"
name = "Bedroom Roku"
device_type = "streaming_box"
connection_type = "roku"
connection = { host = "192.168.1.30", port = 8060 }
supported_commands = ["home", "app_launch"]

[[activities]]
id = "movie"
name = "Watch Movie"

[[activities.steps]]
device_id = "tv"
sort_order = 1
command = { action = "power_on" }

[[activities.steps]]
device_id = "roku"
sort_order = 2
command = { action = "app_launch", payload = { text = "netflix" } }
"#;

    #[tokio::test]
    async fn test_catalog_round_trip_through_store() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let store = InMemoryStore::from_catalog(catalog).unwrap();

        let roku = store.get_device(&Id::from("roku")).await.unwrap().unwrap();
        assert_eq!(roku.connection_type, ConnectionType::Roku);
        assert!(roku.supports_command(CommandType::Home));
        assert!(!roku.supports_command(CommandType::Power));

        let movie = store.get_activity(&Id::from("movie")).await.unwrap().unwrap();
        assert_eq!(movie.steps().len(), 2);
        assert!(store.get_activity(&Id::from("missing")).await.unwrap().is_none());

        let names: Vec<_> = store.list_devices().await.unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Bedroom Roku", "Living Room TV"]);
    }

    #[test]
    fn test_unknown_step_device_rejected() {
        let text = CATALOG.replace("device_id = \"roku\"", "device_id = \"projector\"");
        assert!(matches!(Catalog::from_toml_str(&text), Err(Error::Validation(_))));
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let text = format!(
            "{}\n[[devices]]\nid = \"tv\"\nname = \"Again\"\ndevice_type = \"tv\"\nconnection_type = \"adb\"\n",
            CATALOG
        );
        assert!(matches!(Catalog::from_toml_str(&text), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = Catalog::load(file.path()).await.unwrap();
        assert_eq!(catalog.devices.len(), 2);
        assert_eq!(catalog.activities.len(), 1);

        assert!(matches!(
            Catalog::load(file.path().with_extension("missing")).await,
            Err(Error::Store(_))
        ));
    }
}
