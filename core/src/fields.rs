//! The field catalogue.
//!
//! Raw fees, computed-fee names and condition attributes are all described
//! by explicit ordered tables here. Nothing downstream iterates a map to
//! discover which fields exist.

use crate::types::RuleId;

pub const RAW_FEE_COUNT: usize = 17;

/// A directly stored monetary field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFee {
    pub name:  &'static str,
    pub index: usize,
}

pub const RAW_FEES: [RawFee; RAW_FEE_COUNT] = [
    RawFee { name: "fee1",  index: 0 },
    RawFee { name: "fee2",  index: 1 },
    RawFee { name: "fee3",  index: 2 },
    RawFee { name: "fee4",  index: 3 },
    RawFee { name: "fee5",  index: 4 },
    RawFee { name: "fee6",  index: 5 },
    RawFee { name: "fee7",  index: 6 },
    RawFee { name: "fee8",  index: 7 },
    RawFee { name: "fee9",  index: 8 },
    RawFee { name: "fee10", index: 9 },
    RawFee { name: "fee11", index: 10 },
    RawFee { name: "fee12", index: 11 },
    RawFee { name: "fee13", index: 12 },
    RawFee { name: "fee14", index: 13 },
    RawFee { name: "fee15", index: 14 },
    RawFee { name: "fee16", index: 15 },
    RawFee { name: "fee17", index: 16 },
];

/// Index of a raw fee by name, or None when `name` is not a raw fee.
pub fn raw_fee_index(name: &str) -> Option<usize> {
    RAW_FEES.iter().find(|f| f.name == name).map(|f| f.index)
}

const COMPUTED_PREFIX: &str = "computed_fee";

/// `computed_fee<ID>`: the formula reference, the cache column and the
/// policy propagation target all share this name.
pub fn computed_fee_name(id: RuleId) -> String {
    format!("{COMPUTED_PREFIX}{id}")
}

/// Parse a `computed_fee<ID>` reference.
pub fn computed_fee_id(name: &str) -> Option<RuleId> {
    let digits = name.strip_prefix(COMPUTED_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Categorical attributes a condition or filter may constrain, in the
/// order they are rendered into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attribute {
    Pid,
    ProducerName,
    Type,
    Subtype,
    Category,
    Region,
}

pub const ATTRIBUTES: [Attribute; 6] = [
    Attribute::Pid,
    Attribute::ProducerName,
    Attribute::Type,
    Attribute::Subtype,
    Attribute::Category,
    Attribute::Region,
];

impl Attribute {
    pub fn from_key(key: &str) -> Option<Self> {
        ATTRIBUTES.iter().copied().find(|a| a.key() == key)
    }

    /// The key used in stored conditions.
    pub fn key(self) -> &'static str {
        match self {
            Attribute::Pid          => "pid",
            Attribute::ProducerName => "producer_name",
            Attribute::Type         => "type",
            Attribute::Subtype      => "subtype",
            Attribute::Category     => "category",
            Attribute::Region       => "region",
        }
    }

    /// Qualified column on the fact table (aliased `r` in every query).
    pub fn column(self) -> &'static str {
        match self {
            Attribute::Pid          => "r.pid",
            Attribute::ProducerName => "r.producer_name",
            Attribute::Type         => "r.type",
            Attribute::Subtype      => "r.subtype",
            Attribute::Category     => "r.category",
            Attribute::Region       => "r.region",
        }
    }
}

/// Any field a formula or policy can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef {
    Raw(usize),
    Computed(RuleId),
    Quantity,
    Pid,
}

impl FieldRef {
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(i) = raw_fee_index(name) {
            return Some(FieldRef::Raw(i));
        }
        if let Some(id) = computed_fee_id(name) {
            return Some(FieldRef::Computed(id));
        }
        match name {
            "quantity" => Some(FieldRef::Quantity),
            "pid"      => Some(FieldRef::Pid),
            _          => None,
        }
    }
}
