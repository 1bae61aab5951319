use crate::common::*;

/// Element type of a tensor.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    F32,
    I32,
    I64,
}

/// Dense tensor data of any supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(ArrayD<f32>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
}

impl TensorData {
    pub fn dtype(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::F32,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(array) => array.shape(),
            Self::I32(array) => array.shape(),
            Self::I64(array) => array.shape(),
        }
    }

    /// Converts the elements to `dtype` with `as` semantics.
    pub fn cast(&self, dtype: DataType) -> Self {
        macro_rules! cast {
            ($array:expr) => {
                match dtype {
                    DataType::F32 => Self::F32($array.mapv(|value| value as f32)),
                    DataType::I32 => Self::I32($array.mapv(|value| value as i32)),
                    DataType::I64 => Self::I64($array.mapv(|value| value as i64)),
                }
            };
        }

        match self {
            Self::F32(array) => cast!(array),
            Self::I32(array) => cast!(array),
            Self::I64(array) => cast!(array),
        }
    }

    /// Reshapes into `shape`, which must hold the same number of elements.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        macro_rules! reshape {
            ($variant:ident, $array:expr) => {
                Self::$variant(
                    $array
                        .as_standard_layout()
                        .into_owned()
                        .into_shape(IxDyn(shape))
                        .map_err(|err| SsdError::Shape(format!("cannot reshape: {}", err)))?,
                )
            };
        }

        let reshaped = match self {
            Self::F32(array) => reshape!(F32, array),
            Self::I32(array) => reshape!(I32, array),
            Self::I64(array) => reshape!(I64, array),
        };
        Ok(reshaped)
    }
}

/// Element types storable in a [TensorData].
pub trait TensorElement: Sized + Clone {
    const DTYPE: DataType;

    fn data_view(data: &TensorData) -> Option<ArrayViewD<'_, Self>>;

    fn into_data(array: ArrayD<Self>) -> TensorData;
}

macro_rules! impl_tensor_element {
    ($ty:ty, $variant:ident) => {
        impl TensorElement for $ty {
            const DTYPE: DataType = DataType::$variant;

            fn data_view(data: &TensorData) -> Option<ArrayViewD<'_, Self>> {
                match data {
                    TensorData::$variant(array) => Some(array.view()),
                    _ => None,
                }
            }

            fn into_data(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }
        }
    };
}

impl_tensor_element!(f32, F32);
impl_tensor_element!(i32, I32);
impl_tensor_element!(i64, I64);

impl<T, D> From<Array<T, D>> for TensorData
where
    T: TensorElement,
    D: Dimension,
{
    fn from(from: Array<T, D>) -> Self {
        T::into_data(from.into_dyn())
    }
}

/// A tensor with optional segment offsets on its first axis.
#[derive(Debug, Clone, PartialEq)]
pub struct LodTensor {
    pub data: TensorData,
    pub lod: Option<Lod>,
}

impl LodTensor {
    pub fn new<T>(data: T) -> Self
    where
        T: Into<TensorData>,
    {
        Self {
            data: data.into(),
            lod: None,
        }
    }

    pub fn with_lod<T>(data: T, lod: Lod) -> Result<Self>
    where
        T: Into<TensorData>,
    {
        let data = data.into();
        let num_rows = data.shape().first().cloned().unwrap_or(0);
        lod.ensure_covers(num_rows, "the tensor")?;
        Ok(Self {
            data,
            lod: Some(lod),
        })
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Borrows the data as an array of element `T` and dimension `D`.
    pub fn view<T, D>(&self) -> Result<ArrayView<'_, T, D>>
    where
        T: TensorElement,
        D: Dimension,
    {
        let view = T::data_view(&self.data).ok_or_else(|| {
            SsdError::Shape(format!(
                "expect a {} tensor, but got {}",
                T::DTYPE,
                self.dtype()
            ))
        })?;
        let view = view.into_dimensionality::<D>().map_err(|_| {
            SsdError::Shape(format!(
                "expect a tensor of rank {:?}, but got shape {:?}",
                D::NDIM,
                self.shape()
            ))
        })?;
        Ok(view)
    }

    /// The segment offsets, or a single segment over all rows.
    pub fn lod_or_single(&self) -> Lod {
        self.lod
            .clone()
            .unwrap_or_else(|| Lod::single(self.shape().first().cloned().unwrap_or(0)))
    }
}
