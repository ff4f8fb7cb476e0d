//! Shape of the JSON-backed configuration store.
//!
//! Loading and saving `picox-8.config.json` is the external config store's
//! job (spec.md §1 Non-goals / §6); this module only defines the shape
//! (`Config`) and the trait boundary (`ConfigStore`) the modem and
//! RAM-disk state machines consult it through.

use heapless::{FnvIndexMap, String, Vec};
use serde::Deserialize;

/// Longest dialed-digit string or hostname we bother bounding statically.
pub const MAX_KEY_LEN: usize = 32;
pub const MAX_HOST_LEN: usize = 64;
pub const MAX_PHONEBOOK_ENTRIES: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct PhonebookEntry {
    pub host: String<MAX_HOST_LEN>,
    pub port: u16,
}

/// Mirrors `original_source/firmware/config.py`'s known keys: `wifi`,
/// `phonebook`, `ramdisk`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub wifi_ssid: Option<String<MAX_KEY_LEN>>,
    pub wifi_password: Option<String<MAX_KEY_LEN>>,
    pub phonebook: Vec<(String<MAX_KEY_LEN>, PhonebookEntry), MAX_PHONEBOOK_ENTRIES>,
    pub ramdisk_image: String<MAX_HOST_LEN>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi_ssid: None,
            wifi_password: None,
            phonebook: Vec::new(),
            ramdisk_image: String::try_from("default-ramdisk.dsk").unwrap(),
        }
    }
}

/// The boundary the modem and RAM-disk state machines consult. A real
/// implementation reads/writes the JSON file on the SD card; this crate
/// only needs an in-memory view of whatever was last loaded/edited by the
/// (external) CLI.
pub trait ConfigStore {
    fn wifi_credentials(&self) -> Option<(&str, &str)>;
    fn lookup(&self, digits: &str) -> Option<(&str, u16)>;
    fn ramdisk_image_name(&self) -> &str;
}

/// A simple in-memory `ConfigStore`, used by tests and as the default
/// before a real config file has been mounted.
pub struct StaticConfigStore {
    config: Config,
}

impl StaticConfigStore {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigStore for StaticConfigStore {
    fn wifi_credentials(&self) -> Option<(&str, &str)> {
        match (&self.config.wifi_ssid, &self.config.wifi_password) {
            (Some(ssid), Some(pass)) => Some((ssid.as_str(), pass.as_str())),
            _ => None,
        }
    }

    fn lookup(&self, digits: &str) -> Option<(&str, u16)> {
        self.config
            .phonebook
            .iter()
            .find(|(k, _)| k.as_str() == digits)
            .map(|(_, entry)| (entry.host.as_str(), entry.port))
    }

    fn ramdisk_image_name(&self) -> &str {
        self.config.ramdisk_image.as_str()
    }
}

/// Used by `cli.rs`'s `set phonebook`/`set wifi` handlers to mutate the
/// config before the external store persists it; kept separate from
/// `ConfigStore` so read paths stay `&self`.
pub trait ConfigEditor {
    fn set_wifi(&mut self, ssid: &str, password: &str);
    fn set_phonebook_entry(&mut self, digits: &str, host: &str, port: u16) -> Result<(), ()>;
    fn set_ramdisk_image(&mut self, name: &str) -> Result<(), ()>;
}

impl ConfigEditor for StaticConfigStore {
    fn set_wifi(&mut self, ssid: &str, password: &str) {
        self.config.wifi_ssid = String::try_from(ssid).ok();
        self.config.wifi_password = String::try_from(password).ok();
    }

    fn set_phonebook_entry(&mut self, digits: &str, host: &str, port: u16) -> Result<(), ()> {
        let key = String::try_from(digits).map_err(|_| ())?;
        let entry = PhonebookEntry {
            host: String::try_from(host).map_err(|_| ())?,
            port,
        };
        if let Some(slot) = self
            .config
            .phonebook
            .iter_mut()
            .find(|(k, _)| k.as_str() == digits)
        {
            slot.1 = entry;
            return Ok(());
        }
        self.config.phonebook.push((key, entry)).map_err(|_| ())
    }

    fn set_ramdisk_image(&mut self, name: &str) -> Result<(), ()> {
        self.config.ramdisk_image = String::try_from(name).map_err(|_| ())?;
        Ok(())
    }
}

// FnvIndexMap pulled in for callers that want a hash-keyed phonebook view
// (e.g. `show phonebook`) without re-scanning the Vec.
pub fn index_phonebook<'a>(
    config: &'a Config,
) -> FnvIndexMap<&'a str, (&'a str, u16), MAX_PHONEBOOK_ENTRIES> {
    let mut map = FnvIndexMap::new();
    for (digits, entry) in config.phonebook.iter() {
        let _ = map.insert(digits.as_str(), (entry.host.as_str(), entry.port));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_missing_entry_returns_none() {
        let store = StaticConfigStore::new(Config::default());
        assert_eq!(store.lookup("5551234"), None);
    }

    #[test]
    fn set_then_lookup_roundtrips() {
        let mut store = StaticConfigStore::new(Config::default());
        store.set_phonebook_entry("123", "bbs.example.com", 23).unwrap();
        assert_eq!(store.lookup("123"), Some(("bbs.example.com", 23)));
    }

    #[test]
    fn default_ramdisk_image_matches_original_default() {
        let store = StaticConfigStore::new(Config::default());
        assert_eq!(store.ramdisk_image_name(), "default-ramdisk.dsk");
    }
}
