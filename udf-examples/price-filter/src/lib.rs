//! Keeps documents whose `price` field falls within `[min, max]`
//! (inclusive), read from the UDF call's own parameters. Declares only
//! `read_document`, so the coordination-tier planner pushes it down to
//! run shard-side (spec.md §4.2.2, §4.5.1).
//!
//! Built against `searchdog-udf-sdk`'s ABI: the module exports `alloc`,
//! `memory` and `udf_invoke`, and imports the `env.*` host functions the
//! sandbox's linker registers (`searchdog::udf::sandbox::host`).

use searchdog_udf_sdk::{GuestBuffer, Value};

mod host {
    unsafe extern "C" {
        pub fn get_field_float64(ptr: u32, len: u32) -> f64;
        pub fn get_param(ptr: u32, len: u32) -> i64;
    }
}

fn read_guest_string(ptr: u32, len: u32) -> String {
    let slice = unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) };
    String::from_utf8_lossy(slice).into_owned()
}

fn write_guest_bytes(bytes: &[u8]) -> i64 {
    let ptr = searchdog_udf_sdk::alloc(bytes.len());
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
    }
    GuestBuffer { ptr: ptr as u32, len: bytes.len() as u32 }.pack()
}

fn call_get_param(name: &str) -> Value {
    let encoded = name.as_bytes();
    let ptr = searchdog_udf_sdk::alloc(encoded.len());
    unsafe {
        std::ptr::copy_nonoverlapping(encoded.as_ptr(), ptr, encoded.len());
    }
    let packed = unsafe { host::get_param(ptr as u32, encoded.len() as u32) };
    let buf = GuestBuffer::unpack(packed);
    let json = read_guest_string(buf.ptr, buf.len);
    serde_json::from_str(&json).unwrap_or(Value::Null)
}

fn field_float64(path: &str) -> f64 {
    let encoded = path.as_bytes();
    let ptr = searchdog_udf_sdk::alloc(encoded.len());
    unsafe {
        std::ptr::copy_nonoverlapping(encoded.as_ptr(), ptr, encoded.len());
    }
    unsafe { host::get_field_float64(ptr as u32, encoded.len() as u32) }
}

#[unsafe(no_mangle)]
pub extern "C" fn alloc(len: u32) -> u32 {
    searchdog_udf_sdk::alloc(len as usize) as u32
}

/// # Safety
/// `ptr`/`len` must be a value this module previously returned from its own
/// `alloc` export and not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dealloc(ptr: u32, len: u32) {
    unsafe { searchdog_udf_sdk::dealloc(ptr as *mut u8, len as usize) }
}

fn price_matches(price: f64, min: f64, max: f64) -> bool {
    price.is_finite() && price >= min && price <= max
}

/// Entrypoint the sandbox invokes after writing the JSON-encoded call
/// params into the region `(ptr, len)`. Returns a packed [`GuestBuffer`]
/// pointing at the JSON-encoded result `Value`.
#[unsafe(no_mangle)]
pub extern "C" fn udf_invoke(_ptr: u32, _len: u32) -> i64 {
    let min = call_get_param("min").as_f64().unwrap_or(f64::NEG_INFINITY);
    let max = call_get_param("max").as_f64().unwrap_or(f64::INFINITY);
    let price = field_float64("price");

    let matched = price_matches(price, min, max);
    let result = serde_json::to_vec(&Value::Bool(matched)).unwrap_or_else(|_| b"false".to_vec());
    write_guest_bytes(&result)
}

#[cfg(test)]
mod test {
    use super::price_matches;

    #[test]
    fn within_range() {
        assert!(price_matches(50.0, 10.0, 100.0));
        assert!(price_matches(10.0, 10.0, 100.0));
        assert!(price_matches(100.0, 10.0, 100.0));
    }

    #[test]
    fn outside_range() {
        assert!(!price_matches(5.0, 10.0, 100.0));
        assert!(!price_matches(101.0, 10.0, 100.0));
    }

    #[test]
    fn rejects_non_finite_price() {
        assert!(!price_matches(f64::NAN, 10.0, 100.0));
        assert!(!price_matches(f64::INFINITY, 10.0, 100.0));
    }

    #[test]
    fn unbounded_defaults_accept_everything() {
        assert!(price_matches(1_000_000.0, f64::NEG_INFINITY, f64::INFINITY));
    }
}
