// ─── NVS sobre esp-idf-svc ───
//
// Cada open() crea un EspNvs nuevo sobre la partición default. EspNvs
// cierra el handle en su Drop, y cada set_* ya hace commit en flash.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use zeroize::Zeroize;

use crate::error::StoreError;
use crate::platform::{KeyValueStore, Namespace};

/// Tamaño máximo de un valor string (SSID, passwords, host).
const MAX_VALUE_LEN: usize = 256;

pub struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self { partition }
    }
}

impl KeyValueStore for NvsStore {
    type Namespace = NvsNamespace;

    /// `read_write = true` crea el namespace si no existe.
    fn open(&mut self, namespace: &str, read_write: bool) -> Result<NvsNamespace, StoreError> {
        EspNvs::new(self.partition.clone(), namespace, read_write)
            .map(|nvs| NvsNamespace { nvs })
            .map_err(|e| StoreError::Unavailable {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })
    }
}

pub struct NvsNamespace {
    nvs: EspNvs<NvsDefault>,
}

impl Namespace for NvsNamespace {
    fn get_str(&self, key: &'static str) -> Result<Option<String>, StoreError> {
        let mut buf = [0u8; MAX_VALUE_LEN];
        let value = self
            .nvs
            .get_str(key, &mut buf)
            .map(|v| v.map(str::to_string))
            .map_err(|e| StoreError::ReadFailed {
                key,
                reason: e.to_string(),
            });
        // El buffer del stack puede tener un password
        buf.zeroize();
        value
    }

    fn get_i32(&self, key: &'static str) -> Result<Option<i32>, StoreError> {
        self.nvs.get_i32(key).map_err(|e| StoreError::ReadFailed {
            key,
            reason: e.to_string(),
        })
    }

    fn set_str(&mut self, key: &'static str, value: &str) -> Result<(), StoreError> {
        self.nvs
            .set_str(key, value)
            .map_err(|e| StoreError::WriteFailed {
                key,
                reason: e.to_string(),
            })
    }

    fn set_i32(&mut self, key: &'static str, value: i32) -> Result<(), StoreError> {
        self.nvs
            .set_i32(key, value)
            .map_err(|e| StoreError::WriteFailed {
                key,
                reason: e.to_string(),
            })
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
