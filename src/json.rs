//! Introspective JSON dump/load of the finalised configuration record,
//! driven by the same block catalogue the dirty-merge path uses
//! (`spec.md` §4.5.5, §6 "JSON debug interface").
//!
//! Every catalogued field round-trips as a named array of its raw
//! little-endian bytes. This is deliberately dumber than a typed
//! `serde_json` struct: the catalogue is the only thing that needs to agree
//! between producer and consumer, so adding a block config doesn't require
//! touching a second hand-written (de)serialisation impl.

use serde_json::{Map, Value};

use crate::backend::BackEndConfig;
use crate::config::CatalogueEntry;
use crate::error::{Error, Result};

fn as_bytes(config: &BackEndConfig) -> &[u8] {
    // SAFETY: `BackEndConfig` is `#[repr(C)]` plain data; this is the same
    // byte-slice view `BackEnd::merge_config` already relies on for the
    // shared-memory ABI.
    unsafe { std::slice::from_raw_parts(config as *const _ as *const u8, std::mem::size_of::<BackEndConfig>()) }
}

fn as_bytes_mut(config: &mut BackEndConfig) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(config as *mut _ as *mut u8, std::mem::size_of::<BackEndConfig>()) }
}

/// Dumps every catalogued field of `config` as `{name: [byte, byte, ...]}`.
pub fn dump(config: &BackEndConfig, catalogue: &[CatalogueEntry]) -> Value {
    let bytes = as_bytes(config);
    let mut map = Map::new();
    for entry in catalogue {
        let field_bytes = &bytes[entry.offset..entry.offset + entry.size];
        let arr: Vec<Value> = field_bytes.iter().map(|&b| Value::from(b)).collect();
        map.insert(entry.name.to_string(), Value::Array(arr));
    }
    Value::Object(map)
}

/// Loads `value` into `config`, overwriting only the catalogued fields
/// present in the object. Clears every dirty flag (hardware state is
/// assumed authoritative after a load) but the caller must always retile
/// afterwards (`spec.md` §4.5.5).
pub fn load(config: &mut BackEndConfig, value: &Value, catalogue: &[CatalogueEntry]) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Json("top-level JSON value is not an object".into()))?;

    for (name, field_value) in obj {
        let entry = catalogue
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::UnknownJsonField(name.clone()))?;
        let arr = field_value
            .as_array()
            .ok_or_else(|| Error::Json(format!("field {name:?} is not an array of bytes")))?;
        if arr.len() != entry.size {
            return Err(Error::Json(format!(
                "field {name:?} has {} bytes, expected {}",
                arr.len(),
                entry.size
            )));
        }
        let mut field_bytes = Vec::with_capacity(entry.size);
        for v in arr {
            let byte = v
                .as_u64()
                .filter(|&b| b <= u8::MAX as u64)
                .ok_or_else(|| Error::Json(format!("field {name:?} contains a non-byte value")))?;
            field_bytes.push(byte as u8);
        }
        let bytes = as_bytes_mut(config);
        bytes[entry.offset..entry.offset + entry.size].copy_from_slice(&field_bytes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackEnd;

    #[test]
    fn round_trip_preserves_catalogued_fields() {
        let mut be = BackEnd::new();
        be.config.debin.coefs = [1, 2, 3, 4];
        let catalogue = BackEnd::catalogue();

        let dumped = dump(&be.config, &catalogue);

        let mut reloaded = BackEnd::new();
        load(&mut reloaded.config, &dumped, &catalogue).unwrap();
        assert_eq!(reloaded.config.debin.coefs, [1, 2, 3, 4]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let catalogue = BackEnd::catalogue();
        let mut config = BackEnd::new().config;
        let value = serde_json::json!({ "not_a_real_block": [1, 2] });
        let err = load(&mut config, &value, &catalogue).unwrap_err();
        assert!(matches!(err, Error::UnknownJsonField(_)));
    }
}
