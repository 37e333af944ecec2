//! NTP timestamp helpers.

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
pub const NTP_UNIX_OFFSET_SECS: u64 = 0x83AA_7E80;

/// Convert Unix milliseconds to a 64-bit NTP timestamp split in `(msw, lsw)`.
#[must_use]
pub const fn from_unix_ms(unix_ms: u64) -> (u32, u32) {
    let secs = unix_ms / 1000 + NTP_UNIX_OFFSET_SECS;
    let frac = ((unix_ms % 1000) << 32) / 1000;
    (secs as u32, frac as u32)
}

/// Convert an NTP timestamp back to Unix milliseconds.
#[must_use]
pub const fn to_unix_ms(msw: u32, lsw: u32) -> u64 {
    let secs = (msw as u64).saturating_sub(NTP_UNIX_OFFSET_SECS);
    // Round to nearest so a fraction produced by `from_unix_ms` maps back exactly.
    secs * 1000 + (((lsw as u64) * 1000 + (1 << 31)) >> 32)
}

/// Middle 32 bits of the NTP timestamp, as echoed in LSR / LRR fields.
#[must_use]
pub const fn compact(msw: u32, lsw: u32) -> u32 {
    ((msw & 0xFFFF) << 16) | ((lsw >> 16) & 0xFFFF)
}

/// Milliseconds to the 1/65536 s unit used by DLSR.
#[must_use]
pub const fn ms_to_dlsr(ms: u64) -> u32 {
    (ms * 65536 / 1000) as u32
}

/// DLSR units back to milliseconds.
#[must_use]
pub const fn dlsr_to_ms(dlsr: u32) -> u64 {
    dlsr as u64 * 1000 / 65536
}
