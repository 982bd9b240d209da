//! Enumerated constants shared by the grid handle and the engine boundary.
//!
//! Every constant parses from, and serializes to, its conventional upper case name, eg
//! `"CORNER_VFACE"` or `"SPH_DEG"`.
//!
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The conventional upper case name of this constant
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|value| value.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| {
                        Error::Argument(format!("unknown {} {:?}", stringify!($name), s))
                    })
            }
        }
    };
}

named_enum! {
    /// Position within a grid cell at which a set of coordinates or items is defined.
    ///
    /// Rank 2 grids use the first four locations, rank 3 grids the last eight. The slot index
    /// of a location (see [`StaggerLoc::index`]) has bit `d` set when the location is offset
    /// by half a cell along dimension `d`.
    StaggerLoc {
        Center => "CENTER",
        Edge1 => "EDGE1",
        Edge2 => "EDGE2",
        Corner => "CORNER",
        CenterVCenter => "CENTER_VCENTER",
        Edge1VCenter => "EDGE1_VCENTER",
        Edge2VCenter => "EDGE2_VCENTER",
        CornerVCenter => "CORNER_VCENTER",
        CenterVFace => "CENTER_VFACE",
        Edge1VFace => "EDGE1_VFACE",
        Edge2VFace => "EDGE2_VFACE",
        CornerVFace => "CORNER_VFACE",
    }
}

impl StaggerLoc {
    const RANK2: [StaggerLoc; 4] = [Self::Center, Self::Edge1, Self::Edge2, Self::Corner];

    const RANK3: [StaggerLoc; 8] = [
        Self::CenterVCenter,
        Self::Edge1VCenter,
        Self::Edge2VCenter,
        Self::CornerVCenter,
        Self::CenterVFace,
        Self::Edge1VFace,
        Self::Edge2VFace,
        Self::CornerVFace,
    ];

    /// All stagger locations valid for a grid of the given rank, ordered by slot index.
    ///
    pub fn all(rank: usize) -> Result<&'static [StaggerLoc]> {
        match rank {
            2 => Ok(&Self::RANK2),
            3 => Ok(&Self::RANK3),
            _ => Err(Error::Rank(rank)),
        }
    }

    /// The cell center location for a grid of the given rank.
    pub fn center(rank: usize) -> Result<Self> {
        Ok(Self::all(rank)?[0])
    }

    /// The cell corner location for a grid of the given rank.
    pub fn corner(rank: usize) -> Result<Self> {
        Ok(Self::all(rank)?[3])
    }

    /// Rank of the grids this location belongs to
    pub fn rank(self) -> usize {
        match self {
            Self::Center | Self::Edge1 | Self::Edge2 | Self::Corner => 2,
            _ => 3,
        }
    }

    /// Slot index of this location, in `0..2^rank`
    pub fn index(self) -> usize {
        match self {
            Self::Center | Self::CenterVCenter => 0,
            Self::Edge1 | Self::Edge1VCenter => 1,
            Self::Edge2 | Self::Edge2VCenter => 2,
            Self::Corner | Self::CornerVCenter => 3,
            Self::CenterVFace => 4,
            Self::Edge1VFace => 5,
            Self::Edge2VFace => 6,
            Self::CornerVFace => 7,
        }
    }

    /// Whether this location sits half a cell off center along dimension `dim`.
    ///
    /// A grid has one more point along an offset dimension than it has cells, unless that
    /// dimension is periodic.
    ///
    pub fn is_offset(self, dim: usize) -> bool {
        (self.index() >> dim) & 1 == 1
    }

    /// Whether coordinates at this location describe cell corners, as needed for
    /// conservative regridding.
    pub fn is_corner(self) -> bool {
        matches!(self, Self::Corner | Self::CornerVCenter | Self::CornerVFace)
    }

    pub(crate) fn check_rank(self, rank: usize) -> Result<()> {
        if self.rank() == rank {
            Ok(())
        } else {
            Err(Error::StaggerRank { loc: self, rank })
        }
    }
}

named_enum! {
    /// Numeric kind of a buffer held by the engine
    TypeKind {
        I4 => "I4",
        I8 => "I8",
        R4 => "R4",
        R8 => "R8",
    }
}

named_enum! {
    /// Coordinate system of a grid
    CoordSys {
        Cart => "CART",
        SphDeg => "SPH_DEG",
        SphRad => "SPH_RAD",
    }
}

impl Default for CoordSys {
    fn default() -> Self {
        Self::SphDeg
    }
}

named_enum! {
    /// On-disk grid and mesh formats known to the engine
    FileFormat {
        Vtk => "VTK",
        Scrip => "SCRIP",
        EsmfMesh => "ESMFMESH",
        Ugrid => "UGRID",
        Gridspec => "GRIDSPEC",
    }
}

named_enum! {
    /// Auxiliary per-cell data that may be attached to a stagger location.
    GridItem {
        /// Integer validity flag
        Mask => "MASK",

        /// Floating point cell area
        Area => "AREA",
    }
}

impl GridItem {
    /// Element kind the engine stores this item as
    pub fn kind(self) -> TypeKind {
        match self {
            Self::Mask => TypeKind::I4,
            Self::Area => TypeKind::R8,
        }
    }
}

named_enum! {
    /// How cells are divided among workers when a dimension does not divide evenly
    DecompFlag {
        Default => "DEFAULT",
        Balanced => "BALANCED",
        RestFirst => "RESTFIRST",
        RestLast => "RESTLAST",
        Cyclic => "CYCLIC",
    }
}
