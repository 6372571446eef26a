pub struct Config;

impl Config {
    /// Size in bytes of a guest variant. Checked against the layout of
    /// `GuestVariant` at compile time.
    pub const GUEST_VARIANT_SIZE: usize = 24;
    pub const GUEST_VARIANT_PAYLOAD: u32 = 8;
    pub const STD_STRING_SIZE: usize = 24;
    pub const STD_STRING_SSO: usize = 15;
    pub const STD_VECTOR_SIZE: usize = 12;
    /// Bytes of captured storage a guest timer callback carries.
    pub const CAPTURE_SIZE: usize = 32;

    /// Guest functions take a return slot plus at most this many arguments.
    pub const MAX_VMCALL_ARGS: usize = 7;
    pub const MAX_CALL_ARGS: usize = 8;
    pub const MAX_PRINT_ARGS: usize = 64;
    pub const MAX_NAME_LEN: usize = 256;
    pub const MAX_STRING_LEN: usize = 4 << 20;
    pub const MAX_VECTOR_BYTES: usize = 16 << 20;

    /// Unscoped object addresses below this are almost certainly variant
    /// indices passed by mistake.
    pub const LIKELY_INDEX_LIMIT: u32 = 0x1000;

    pub const DEFAULT_MAX_REFS: usize = 100;
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 8;
    pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 8_000_000;

    pub const PENALTY_VARIANT: u64 = 10_000;
    pub const PENALTY_LOOKUP: u64 = 150_000;
    pub const PENALTY_OBJECT_CALL: u64 = 250_000;
    pub const PENALTY_SPATIAL: u64 = 100_000;
    pub const PENALTY_CONTAINER: u64 = 50_000;
    pub const PENALTY_TIMER: u64 = 100_000;
    pub const PENALTY_UNHANDLED: u64 = 100_000;

    pub const DEFAULT_PROFILING_INTERVAL: u64 = 20_000;

    pub const EXIT_SYMBOL: &'static str = "fast_exit";
    pub const SELF_CALL_METHOD: &'static str = "vmcall";
}
