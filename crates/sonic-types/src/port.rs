//! Port numbers, port sets and spanning-tree port states.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Zero-based switch port number.
pub type PortNo = u32;

/// Ordered set of switch ports.
///
/// Iteration is always in ascending port order. Hardware resources that are
/// allocated "one per port" (compound streams, member streams) are indexed by
/// a port's position in this order.
///
/// # Examples
///
/// ```
/// use sonic_types::PortList;
///
/// let ports: PortList = "0-2,5".parse().unwrap();
/// assert_eq!(ports.len(), 4);
/// assert_eq!(ports.position(5), Some(3));
/// assert_eq!(ports.to_string(), "0-2,5");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortList(BTreeSet<PortNo>);

impl PortList {
    /// Creates an empty port set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a port. Returns false if it was already present.
    pub fn insert(&mut self, port: PortNo) -> bool {
        self.0.insert(port)
    }

    /// Removes a port. Returns false if it was not present.
    pub fn remove(&mut self, port: PortNo) -> bool {
        self.0.remove(&port)
    }

    pub fn contains(&self, port: PortNo) -> bool {
        self.0.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PortNo> + '_ {
        self.0.iter().copied()
    }

    /// Returns the zero-based rank of `port` within the set.
    pub fn position(&self, port: PortNo) -> Option<usize> {
        self.0.iter().position(|&p| p == port)
    }

    /// Returns true if the two sets share at least one port.
    pub fn intersects(&self, other: &PortList) -> bool {
        self.0.intersection(&other.0).next().is_some()
    }

    /// Adds every port of `other` to this set.
    pub fn union_with(&mut self, other: &PortList) {
        self.0.extend(other.0.iter().copied());
    }

    /// Returns a copy holding only ports below `port_cnt`.
    pub fn masked(&self, port_cnt: u32) -> PortList {
        PortList(self.0.iter().copied().filter(|&p| p < port_cnt).collect())
    }

    /// Returns true if `other` holds every port of this set.
    pub fn is_subset(&self, other: &PortList) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<PortNo> for PortList {
    fn from_iter<I: IntoIterator<Item = PortNo>>(iter: I) -> Self {
        PortList(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[PortNo; N]> for PortList {
    fn from(ports: [PortNo; N]) -> Self {
        ports.into_iter().collect()
    }
}

impl fmt::Display for PortList {
    /// Renders ranges, e.g. `0-2,5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.0.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

impl FromStr for PortList {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ports = PortList::new();
        let s = s.trim();
        if s.is_empty() {
            return Ok(ports);
        }

        for part in s.split(',') {
            let part = part.trim();
            let bad = || ParseError::InvalidPortList(s.to_string());
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: PortNo = lo.trim().parse().map_err(|_| bad())?;
                    let hi: PortNo = hi.trim().parse().map_err(|_| bad())?;
                    if lo > hi {
                        return Err(bad());
                    }
                    ports.0.extend(lo..=hi);
                }
                None => {
                    ports.insert(part.parse().map_err(|_| bad())?);
                }
            }
        }

        Ok(ports)
    }
}

/// Spanning-tree (STP or MSTP instance) port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StpState {
    #[default]
    Discarding,
    Learning,
    Forwarding,
}

impl StpState {
    /// Returns true if frames may be forwarded on the port.
    pub const fn is_forwarding(&self) -> bool {
        matches!(self, StpState::Forwarding)
    }
}

impl fmt::Display for StpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StpState::Discarding => "discarding",
            StpState::Learning => "learning",
            StpState::Forwarding => "forwarding",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StpState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discarding" | "blocking" => Ok(StpState::Discarding),
            "learning" => Ok(StpState::Learning),
            "forwarding" => Ok(StpState::Forwarding),
            _ => Err(ParseError::InvalidStpState(s.to_string())),
        }
    }
}
