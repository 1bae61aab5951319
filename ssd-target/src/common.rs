pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::abs_diff_eq;
pub use bbox::{prelude::*, Element, XYXY, XYXY_};
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{iproduct, izip, Itertools as _};
pub use lazy_static::lazy_static;
pub use log::{debug, warn};
pub use ndarray::{
    s, Array, Array1, Array2, Array3, ArrayD, ArrayView, ArrayView1, ArrayView2, ArrayView3,
    ArrayViewD, ArrayViewMut1, Axis, Dimension, Ix2, Ix3, IxDyn,
};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt,
    fmt::Debug,
    iter,
    ops::Range,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator as _};

pub use crate::{
    ensure_config, ensure_shape,
    error::{parse_option, SsdError},
    lod::Lod,
};
