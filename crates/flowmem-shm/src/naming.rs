//! Shared-memory segment naming (spec §6): ASCII-printable, `<= MAX_NAME_LEN`
//! characters, conventionally prefixed by role.

use flowmem_types::{Error, Result, MAX_NAME_LEN};

/// Fixed name of the global registry segment (spec §3 "Lifecycle summary").
pub const REGISTRY_SEGMENT_NAME: &str = "/flowmem-registry";

/// Prefix for pool segments; the full name is `<prefix><pool_name>`.
pub const POOL_SEGMENT_PREFIX: &str = "/flowmem-pool-";

/// Prefix for port-queue segments; the full name is `<prefix><connection name>`.
pub const QUEUE_SEGMENT_PREFIX: &str = "/flowmem-queue-";

/// Validates a segment name per spec §6: ASCII-printable, `1..=MAX_NAME_LEN`
/// bytes, leading `/` as POSIX shm requires.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_arg(format!(
            "segment name must be 1..={MAX_NAME_LEN} bytes, got {}",
            name.len()
        )));
    }
    if !name.starts_with('/') {
        return Err(Error::invalid_arg("segment name must start with '/'"));
    }
    if !name.bytes().all(|b| b.is_ascii_graphic() || b == b'/') {
        return Err(Error::invalid_arg("segment name must be ASCII-printable"));
    }
    Ok(())
}

/// The canonical queue segment name for an output port (spec §4.10 "ensure
/// a port queue exists... if not"; spec §3 "multiple input ports may
/// subscribe to the same queue" — the queue belongs to the *producer*
/// side, so its name is keyed on `(src_block, src_port)` alone, never on
/// which destination is asking).
#[must_use]
pub fn output_port_queue_name(src_block: &str, src_port: &str) -> String {
    let name = format!("{QUEUE_SEGMENT_PREFIX}{src_block}.{src_port}");
    name.chars().take(MAX_NAME_LEN).collect()
}

/// The canonical pool segment name for a named pool.
#[must_use]
pub fn pool_segment_name(pool_name: &str) -> String {
    let name = format!("{POOL_SEGMENT_PREFIX}{pool_name}");
    name.chars().take(MAX_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert!(validate("").is_err());
        assert!(validate(&"/".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(validate("no-leading-slash").is_err());
    }

    #[test]
    fn accepts_well_formed_name() {
        assert!(validate("/flowmem-pool-small").is_ok());
    }

    #[test]
    fn output_port_queue_name_is_deterministic_and_dst_independent() {
        let a = output_port_queue_name("src", "out");
        let b = output_port_queue_name("src", "out");
        assert_eq!(a, b);
        assert!(validate(&a).is_ok());
    }
}
