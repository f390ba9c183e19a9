//! Length-delimited, tag/wire-type encoded messages.
//!
//! The schema is fixed: every message has a hand-written decoder and encoder
//! built on the `prost` wire primitives. Field numbers the decoder does not
//! know are skipped according to their wire type and handed to the
//! [`UnknownFieldPolicy`].

pub mod decode;
pub mod encode;
pub mod frame;
pub mod unknown;

pub use decode::*;
pub use encode::*;
pub use frame::*;
pub use unknown::*;

pub(crate) mod tags {
    pub mod envelope {
        pub const UPDATE: u32 = 1;
        pub const SPAN: u32 = 2;
        pub const METADATA: u32 = 3;
    }

    pub mod update {
        pub const LOG_EVENTS: u32 = 1;
        pub const DROPPED_EVENTS: u32 = 2;
        pub const SESSION_RESET: u32 = 3;
    }

    pub mod log_event {
        pub const MESSAGE: u32 = 1;
        pub const PARENT: u32 = 2;
        pub const METADATA_ID: u32 = 3;
        pub const FIELDS: u32 = 4;
        pub const AT: u32 = 5;
    }

    pub mod span {
        pub const ID: u32 = 1;
        pub const PARENT: u32 = 2;
        pub const METADATA_ID: u32 = 3;
        pub const FIELDS: u32 = 4;
        pub const CREATED_AT: u32 = 5;
        pub const CLOSED_AT: u32 = 6;
        pub const KIND: u32 = 7;
        pub const INPUTS: u32 = 8;
        pub const TAURI_INPUTS: u32 = 9;
    }

    pub mod field {
        pub const NAME: u32 = 1;
        pub const DEBUG_VAL: u32 = 3;
        pub const STR_VAL: u32 = 4;
        pub const U64_VAL: u32 = 5;
        pub const I64_VAL: u32 = 6;
        pub const BOOL_VAL: u32 = 7;
        pub const F64_VAL: u32 = 9;
    }

    pub mod metadata {
        pub const ID: u32 = 1;
        pub const NAME: u32 = 2;
        pub const TARGET: u32 = 3;
        pub const LOCATION: u32 = 4;
        pub const LEVEL: u32 = 5;
        pub const FIELD_NAMES: u32 = 6;
        pub const IS_SPAN: u32 = 7;
    }

    pub mod location {
        pub const FILE: u32 = 1;
        pub const LINE: u32 = 2;
        pub const COLUMN: u32 = 3;
    }

    pub mod timestamp {
        pub const SECONDS: u32 = 1;
        pub const NANOS: u32 = 2;
    }
}
