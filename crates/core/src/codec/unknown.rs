use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use prost::encoding::WireType;

/// A field the decoder skipped because its number is not part of the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    /// Name of the message the field appeared in.
    pub message: &'static str,
    pub tag: u32,
    pub wire_type: WireType,
    /// Raw value bytes as they appeared on the wire (length prefix included
    /// for length-delimited values).
    pub raw: Vec<u8>,
}

pub trait UnknownFieldObserver: Send + Sync {
    fn on_unknown_field(&self, field: UnknownField);
}

impl<F> UnknownFieldObserver for F
where
    F: Fn(UnknownField) + Send + Sync,
{
    fn on_unknown_field(&self, field: UnknownField) {
        self(field)
    }
}

/// What the decoder does with skipped fields. Skipping itself is never fatal.
#[derive(Clone, Default)]
pub enum UnknownFieldPolicy {
    #[default]
    Discard,
    Observe(Arc<dyn UnknownFieldObserver>),
}

impl UnknownFieldPolicy {
    pub fn observe(observer: impl UnknownFieldObserver + 'static) -> Self {
        UnknownFieldPolicy::Observe(Arc::new(observer))
    }
}

impl fmt::Debug for UnknownFieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownFieldPolicy::Discard => f.write_str("Discard"),
            UnknownFieldPolicy::Observe(_) => f.write_str("Observe(..)"),
        }
    }
}

/// Observer that keeps every skipped field in memory.
#[derive(Debug, Default)]
pub struct UnknownFieldLog {
    fields: Mutex<Vec<UnknownField>>,
}

impl UnknownFieldLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<UnknownField> {
        std::mem::take(&mut *self.fields.lock())
    }
}

impl UnknownFieldObserver for UnknownFieldLog {
    fn on_unknown_field(&self, field: UnknownField) {
        self.fields.lock().push(field);
    }
}
