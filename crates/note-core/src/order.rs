//! OrderNumber: 1-based rank of a line within its note.
//!
//! The order numbers of a note's lines always form the contiguous range
//! `1..=N` where `N` is the line count. Zero is reserved as the transient
//! parking slot used while positions are reassigned (see `plan`).

use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order number must be >= 1, got {0}")]
    OutOfRange(u32),
}

/// The position of a line within its note, strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct OrderNumber(u32);

impl OrderNumber {
    /// The first position in any non-empty note.
    pub const FIRST: OrderNumber = OrderNumber(1);

    pub fn new(value: u32) -> Result<Self, OrderError> {
        if value == 0 {
            return Err(OrderError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Display for OrderNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for OrderNumber {
    type Error = OrderError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderNumber> for u32 {
    fn from(order: OrderNumber) -> u32 {
        order.0
    }
}

// Validates on the way in so a zero never reaches the domain.
impl<'de> serde::Deserialize<'de> for OrderNumber {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value: u32 = serde::Deserialize::deserialize(d)?;
        OrderNumber::new(value).map_err(serde::de::Error::custom)
    }
}
