//! VLAN/VXLAN tag range parsing.
//!
//! A range spec is a comma-separated list of `min-max` pairs, e.g.
//! `"5-100, 101-200"`. Ranges are validated individually and kept in input
//! order; overlap between ranges is left to the allocator that consumes the
//! set.

use std::str::FromStr;

use thiserror::Error;

/// Default highest usable VLAN id (4095 is reserved).
pub const VLAN_DEFAULT_MAX: u32 = 4094;

/// Default highest usable VXLAN id.
pub const VXLAN_DEFAULT_MAX: u32 = 65535;

/// Lowest usable tag of either kind (0 is reserved).
pub const TAG_MIN: u32 = 1;

/// Tag range parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagRangeError {
    /// Token is not exactly `<number>-<number>`.
    #[error("malformed tag range '{0}'")]
    MalformedRange(String),

    /// Range lower bound above its upper bound.
    #[error("invalid tag range {min}-{max}: min exceeds max")]
    InvertedRange { min: u64, max: u64 },

    /// Tag outside the kind's legal interval.
    #[error("{kind} tag {value} out of range ({min}-{max})")]
    TagOutOfRange {
        kind: TagKind,
        value: u64,
        min: u32,
        max: u32,
    },

    /// More ranges than the kind allows.
    #[error("{kind} accepts a single tag range, got {count}")]
    MultipleRangesNotAllowed { kind: TagKind, count: usize },

    /// Unrecognized tag kind name.
    #[error("unknown tag kind '{0}'")]
    UnknownKind(String),
}

/// Kind of segmentation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Vlan,
    Vxlan,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vlan => "vlan",
            Self::Vxlan => "vxlan",
        }
    }

    /// Whether a spec of this kind may list more than one range.
    pub fn allows_multiple_ranges(&self) -> bool {
        matches!(self, Self::Vlan)
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagKind {
    type Err = TagRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vlan" => Ok(Self::Vlan),
            "vxlan" => Ok(Self::Vxlan),
            other => Err(TagRangeError::UnknownKind(other.to_string())),
        }
    }
}

/// Per-kind tag ceilings (inclusive).
///
/// Deployments with a different tagging scheme override these instead of
/// relying on the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagLimits {
    pub vlan_max: u32,
    pub vxlan_max: u32,
}

impl TagLimits {
    /// Highest legal tag for a kind.
    pub fn max_for(&self, kind: TagKind) -> u32 {
        match kind {
            TagKind::Vlan => self.vlan_max,
            TagKind::Vxlan => self.vxlan_max,
        }
    }
}

impl Default for TagLimits {
    fn default() -> Self {
        Self {
            vlan_max: VLAN_DEFAULT_MAX,
            vxlan_max: VXLAN_DEFAULT_MAX,
        }
    }
}

/// Inclusive tag range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRange {
    pub min: u32,
    pub max: u32,
}

impl TagRange {
    pub fn contains(&self, tag: u32) -> bool {
        (self.min..=self.max).contains(&tag)
    }

    /// Number of tags in the range.
    pub fn size(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }
}

impl std::fmt::Display for TagRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Validated, immutable set of tag ranges of a single kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRangeSet {
    kind: TagKind,
    ranges: Vec<TagRange>,
}

impl TagRangeSet {
    /// Parse a range spec using the default tag ceilings.
    pub fn parse(spec: &str, kind: TagKind) -> Result<Self, TagRangeError> {
        Self::parse_with_limits(spec, kind, &TagLimits::default())
    }

    /// Parse a range spec against explicit tag ceilings.
    pub fn parse_with_limits(
        spec: &str,
        kind: TagKind,
        limits: &TagLimits,
    ) -> Result<Self, TagRangeError> {
        let tokens: Vec<&str> = spec.split(',').map(str::trim).collect();

        if tokens.len() > 1 && !kind.allows_multiple_ranges() {
            return Err(TagRangeError::MultipleRangesNotAllowed {
                kind,
                count: tokens.len(),
            });
        }

        let max = limits.max_for(kind);
        let ranges = tokens
            .into_iter()
            .map(|token| parse_range(token, kind, max))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { kind, ranges })
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    /// Ranges in the order they were specified.
    pub fn ranges(&self) -> &[TagRange] {
        &self.ranges
    }

    /// Check if any range holds the tag.
    pub fn contains(&self, tag: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(tag))
    }

    /// Sum of range sizes (overlaps counted twice).
    pub fn total_tags(&self) -> u64 {
        self.ranges.iter().map(TagRange::size).sum()
    }
}

/// Parse a tag range spec of the given kind with default ceilings.
pub fn parse_tag_ranges(spec: &str, kind: TagKind) -> Result<TagRangeSet, TagRangeError> {
    TagRangeSet::parse(spec, kind)
}

fn parse_range(token: &str, kind: TagKind, max: u32) -> Result<TagRange, TagRangeError> {
    let malformed = || TagRangeError::MalformedRange(token.to_string());

    let mut parts = token.split('-');
    let (Some(lo), Some(hi), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };

    let lo = parse_tag(lo).ok_or_else(malformed)?;
    let hi = parse_tag(hi).ok_or_else(malformed)?;

    if lo > hi {
        return Err(TagRangeError::InvertedRange { min: lo, max: hi });
    }

    for value in [lo, hi] {
        if value < u64::from(TAG_MIN) || value > u64::from(max) {
            return Err(TagRangeError::TagOutOfRange {
                kind,
                value,
                min: TAG_MIN,
                max,
            });
        }
    }

    // both bounds fit in `max`, which is a u32
    Ok(TagRange {
        min: lo as u32,
        max: hi as u32,
    })
}

/// Decimal digits only. Values too large for u64 saturate so they fail the
/// bounds check rather than the shape check.
fn parse_tag(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(s.parse().unwrap_or(u64::MAX))
}
