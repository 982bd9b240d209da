use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{CoordSys, DecompFlag, FileFormat, StaggerLoc, TypeKind};
use crate::errors::{Error, Result};

/// Construction arguments for a [`Grid`](crate::Grid).
///
/// A grid is either created in memory, which requires `max_index`, or from a file, which
/// requires `filename` and `filetype`. Arguments that only apply to the other mode are ignored
/// with a warning rather than rejected.
///
/// Options can be built with the chainable setters or deserialized from a configuration file:
///
/// ```
/// # use esmgrid::{GridOptions, StaggerLoc};
/// let options: GridOptions = serde_json::from_str(
///     r#"{"max_index": [10, 20], "num_peri_dims": 1, "staggerloc": "CENTER"}"#,
/// ).unwrap();
/// assert_eq!(options.max_index, Some(vec![10, 20]));
/// assert_eq!(options.staggerloc, Some(vec![StaggerLoc::Center]));
/// ```
///
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridOptions {
    /// Number of cells in each dimension, for in-memory grids
    pub max_index: Option<Vec<i32>>,

    /// Number of periodic dimensions, 0 or 1
    pub num_peri_dims: Option<usize>,

    /// Zero based periodic dimension, defaults to 0
    pub periodic_dim: Option<usize>,

    /// Zero based pole dimension, defaults to 1, or 0 when `periodic_dim` is 1
    pub pole_dim: Option<usize>,

    /// Defaults to spherical degrees
    pub coord_sys: Option<CoordSys>,

    /// Coordinate element kind, R4 or R8. Defaults to R8.
    pub coord_typekind: Option<TypeKind>,

    /// Stagger location(s) at which to add coordinates right away
    #[serde(deserialize_with = "one_or_many")]
    pub staggerloc: Option<Vec<StaggerLoc>>,

    pub filename: Option<PathBuf>,
    pub filetype: Option<FileFormat>,

    /// Number of blocks per dimension, defaults to `[pet_count, 1]`
    pub reg_decomp: Option<Vec<i32>>,
    pub decompflag: Option<Vec<DecompFlag>>,

    /// Spherical (periodic in the first dimension) or regional, defaults to true
    pub is_sphere: Option<bool>,

    /// Also load corner coordinates, needed for conservative regridding
    pub add_corner_stagger: Option<bool>,

    /// Read cell areas from the file
    pub add_user_area: Option<bool>,

    /// Derive a mask from the missing value of `varname` (GRIDSPEC only)
    pub add_mask: Option<bool>,
    pub varname: Option<String>,

    /// Longitude and latitude variable names (GRIDSPEC only)
    pub coord_names: Option<Vec<String>>,
}

/// How a grid is created, resolved from [`GridOptions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode<'a> {
    InMemory {
        max_index: &'a [i32],
    },
    FromFile {
        filename: &'a Path,
        filetype: FileFormat,
    },
}

impl GridOptions {
    /// Options for an in-memory grid
    pub fn in_memory(max_index: &[i32]) -> Self {
        Self {
            max_index: Some(max_index.to_vec()),
            ..Self::default()
        }
    }

    /// Options for a grid read from file
    pub fn from_file<P>(filename: P, filetype: FileFormat) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            filename: Some(filename.into()),
            filetype: Some(filetype),
            ..Self::default()
        }
    }

    pub fn num_peri_dims(mut self, num_peri_dims: usize) -> Self {
        self.num_peri_dims = Some(num_peri_dims);
        self
    }

    pub fn periodic_dim(mut self, periodic_dim: usize) -> Self {
        self.periodic_dim = Some(periodic_dim);
        self
    }

    pub fn pole_dim(mut self, pole_dim: usize) -> Self {
        self.pole_dim = Some(pole_dim);
        self
    }

    pub fn coord_sys(mut self, coord_sys: CoordSys) -> Self {
        self.coord_sys = Some(coord_sys);
        self
    }

    pub fn coord_typekind(mut self, coord_typekind: TypeKind) -> Self {
        self.coord_typekind = Some(coord_typekind);
        self
    }

    pub fn staggerloc<L>(mut self, staggerloc: L) -> Self
    where
        L: Into<crate::StaggerLocs>,
    {
        self.staggerloc = Some(staggerloc.into().as_slice().to_vec());
        self
    }

    pub fn reg_decomp(mut self, reg_decomp: &[i32]) -> Self {
        self.reg_decomp = Some(reg_decomp.to_vec());
        self
    }

    pub fn decompflag(mut self, decompflag: &[DecompFlag]) -> Self {
        self.decompflag = Some(decompflag.to_vec());
        self
    }

    pub fn is_sphere(mut self, is_sphere: bool) -> Self {
        self.is_sphere = Some(is_sphere);
        self
    }

    pub fn add_corner_stagger(mut self, add_corner_stagger: bool) -> Self {
        self.add_corner_stagger = Some(add_corner_stagger);
        self
    }

    pub fn add_user_area(mut self, add_user_area: bool) -> Self {
        self.add_user_area = Some(add_user_area);
        self
    }

    pub fn add_mask(mut self, add_mask: bool) -> Self {
        self.add_mask = Some(add_mask);
        self
    }

    pub fn varname(mut self, varname: &str) -> Self {
        self.varname = Some(varname.to_string());
        self
    }

    pub fn coord_names(mut self, lon: &str, lat: &str) -> Self {
        self.coord_names = Some(vec![lon.to_string(), lat.to_string()]);
        self
    }

    /// Work out which creation mode these options select.
    ///
    /// `max_index` wins if present. Otherwise both `filename` and `filetype` are required.
    ///
    pub fn mode(&self) -> Result<Mode<'_>> {
        match (&self.max_index, &self.filename, self.filetype) {
            (Some(max_index), _, _) => Ok(Mode::InMemory { max_index }),
            (None, Some(filename), Some(filetype)) => Ok(Mode::FromFile { filename, filetype }),
            _ => Err(Error::Argument(
                "must supply either max_index for an in-memory grid or filename and filetype \
                 for a from-file grid"
                    .into(),
            )),
        }
    }

    /// Names of the arguments that were supplied but don't apply to the selected mode.
    ///
    pub fn ignored_arguments(&self) -> Result<Vec<&'static str>> {
        let mut ignored = vec![];
        let mut check = |name, present: bool| {
            if present {
                ignored.push(name);
            }
        };

        match self.mode()? {
            Mode::InMemory { .. } => {
                check("filename", self.filename.is_some());
                check("filetype", self.filetype.is_some());
                check("reg_decomp", self.reg_decomp.is_some());
                check("decompflag", self.decompflag.is_some());
                check("is_sphere", self.is_sphere.is_some());
                check("add_corner_stagger", self.add_corner_stagger.is_some());
                check("add_user_area", self.add_user_area.is_some());
                check("add_mask", self.add_mask.is_some());
                check("varname", self.varname.is_some());
                check(
                    "coord_names",
                    self.coord_names.as_ref().map_or(false, |names| !names.is_empty()),
                );
                check(
                    "periodic_dim",
                    self.periodic_dim.is_some() && self.num_peri_dims.unwrap_or(0) == 0,
                );
                check(
                    "pole_dim",
                    self.pole_dim.is_some() && self.num_peri_dims.unwrap_or(0) == 0,
                );
            }
            Mode::FromFile { .. } => {
                check(
                    "num_peri_dims",
                    self.num_peri_dims.map_or(false, |n| n != 0),
                );
                check("periodic_dim", self.periodic_dim.is_some());
                check("pole_dim", self.pole_dim.is_some());
                check("coord_sys", self.coord_sys.is_some());
                check("coord_typekind", self.coord_typekind.is_some());
                check("staggerloc", self.staggerloc.is_some());
            }
        }

        Ok(ignored)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<StaggerLoc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(StaggerLoc),
        Many(Vec<StaggerLoc>),
    }

    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|locs| match locs {
            OneOrMany::One(loc) => vec![loc],
            OneOrMany::Many(locs) => locs,
        }),
    )
}
