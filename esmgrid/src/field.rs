//! Views aliasing coordinate and item buffers.
//!
//! A `Field` is a raw, untyped-at-compile-time view over a buffer that is usually owned by the
//! engine. It never frees what it points at. Safe, lifetime-bound `ndarray` views are handed out
//! through the [`Element`] trait, which maps Rust element types to engine type kinds.
//!
use std::any::Any;
use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::Arc;

use ndarray::{
    ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn, RawArrayViewMut, ShapeBuilder, Slice,
};
use num_traits::{One, Zero};

use crate::constants::TypeKind;
use crate::engine::NativeBuffer;
use crate::errors::{Error, Result};
use crate::helpers::volume;

#[derive(Clone)]
pub enum RawField {
    I4(RawArrayViewMut<i32, IxDyn>),
    R4(RawArrayViewMut<f32, IxDyn>),
    R8(RawArrayViewMut<f64, IxDyn>),
}

#[derive(Clone)]
pub(crate) struct Field {
    raw: RawField,

    /// Keeps memory alive for fields that were materialized on our side rather than aliased
    /// from the engine.
    _backing: Option<Arc<dyn Any + Send + Sync>>,
}

// A field is only reachable through its owning grid (or a view that borrows that grid), which
// is what bounds access to the aliased memory.
unsafe impl Send for Field {}

impl Field {
    /// Alias an engine buffer as a column-major array of the given shape.
    ///
    /// # Safety
    ///
    /// The buffer must satisfy the `Engine` contract and outlive the returned field.
    ///
    pub(crate) unsafe fn from_native(
        buffer: NativeBuffer,
        expected: TypeKind,
        shape: &[usize],
    ) -> Result<Self> {
        if buffer.kind != expected {
            return Err(Error::TypeMismatch {
                expected,
                found: buffer.kind,
            });
        }
        let len = volume(shape);
        if buffer.len != len {
            return Err(Error::BufferSize {
                expected: len,
                found: buffer.len,
            });
        }

        let raw = match buffer.kind {
            TypeKind::I4 => RawField::I4(raw_view(buffer.ptr, shape)),
            TypeKind::R4 => RawField::R4(raw_view(buffer.ptr, shape)),
            TypeKind::R8 => RawField::R8(raw_view(buffer.ptr, shape)),
            TypeKind::I8 => {
                return Err(Error::TypeMismatch {
                    expected: TypeKind::I4,
                    found: TypeKind::I8,
                })
            }
        };

        Ok(Self {
            raw,
            _backing: None,
        })
    }

    /// Wrap an array that lives on our side of the boundary.
    pub(crate) fn owned<T: Element>(mut array: ArrayD<T>) -> Self {
        let raw = T::wrap(array.raw_view_mut());

        // Moving the array doesn't move its heap allocation, so `raw` stays valid
        Self {
            raw,
            _backing: Some(Arc::new(array)),
        }
    }

    pub(crate) fn kind(&self) -> TypeKind {
        match self.raw {
            RawField::I4(_) => TypeKind::I4,
            RawField::R4(_) => TypeKind::R4,
            RawField::R8(_) => TypeKind::R8,
        }
    }

    pub(crate) fn shape(&self) -> &[usize] {
        match &self.raw {
            RawField::I4(raw) => raw.shape(),
            RawField::R4(raw) => raw.shape(),
            RawField::R8(raw) => raw.shape(),
        }
    }

    /// Restrict the field to a sub-box. Slices must already be resolved against this field's
    /// shape, one per axis.
    pub(crate) fn slice(&self, slices: &[Slice]) -> Self {
        let mut sliced = self.clone();
        for (axis, slice) in slices.iter().enumerate() {
            match &mut sliced.raw {
                RawField::I4(raw) => raw.slice_axis_inplace(Axis(axis), *slice),
                RawField::R4(raw) => raw.slice_axis_inplace(Axis(axis), *slice),
                RawField::R8(raw) => raw.slice_axis_inplace(Axis(axis), *slice),
            }
        }

        sliced
    }

    pub(crate) fn view<T: Element>(&self) -> Result<ArrayViewD<'_, T>> {
        let raw = T::raw(&self.raw).ok_or(Error::TypeMismatch {
            expected: T::KIND,
            found: self.kind(),
        })?;

        Ok(unsafe { raw.deref_into_view() })
    }

    pub(crate) fn view_mut<T: Element>(&mut self) -> Result<ArrayViewMutD<'_, T>> {
        self.field_view_mut().into_typed()
    }

    pub(crate) fn field_view_mut(&mut self) -> FieldViewMut<'_> {
        unsafe {
            match &self.raw {
                RawField::I4(raw) => FieldViewMut::I4(raw.clone().deref_into_view_mut()),
                RawField::R4(raw) => FieldViewMut::R4(raw.clone().deref_into_view_mut()),
                RawField::R8(raw) => FieldViewMut::R8(raw.clone().deref_into_view_mut()),
            }
        }
    }
}

unsafe fn raw_view<T>(ptr: NonNull<u8>, shape: &[usize]) -> RawArrayViewMut<T, IxDyn> {
    RawArrayViewMut::from_shape_ptr(IxDyn(shape).f(), ptr.as_ptr().cast::<T>())
}

/// A mutable view of a coordinate or item buffer whose element type is only known at runtime.
///
#[derive(Debug)]
pub enum FieldViewMut<'a> {
    I4(ArrayViewMutD<'a, i32>),
    R4(ArrayViewMutD<'a, f32>),
    R8(ArrayViewMutD<'a, f64>),
}

impl<'a> FieldViewMut<'a> {
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::I4(_) => TypeKind::I4,
            Self::R4(_) => TypeKind::R4,
            Self::R8(_) => TypeKind::R8,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::I4(view) => view.shape(),
            Self::R4(view) => view.shape(),
            Self::R8(view) => view.shape(),
        }
    }

    /// Convert into a typed view, failing if `T` doesn't match the buffer's kind.
    pub fn into_typed<T: Element>(self) -> Result<ArrayViewMutD<'a, T>> {
        let found = self.kind();
        T::typed(self).ok_or(Error::TypeMismatch {
            expected: T::KIND,
            found,
        })
    }

    pub(crate) fn fill_zero(&mut self) {
        match self {
            Self::I4(view) => zeros(view),
            Self::R4(view) => zeros(view),
            Self::R8(view) => zeros(view),
        }
    }

    pub(crate) fn fill_one(&mut self) {
        match self {
            Self::I4(view) => ones(view),
            Self::R4(view) => ones(view),
            Self::R8(view) => ones(view),
        }
    }
}

fn zeros<T: Element>(view: &mut ArrayViewMutD<'_, T>) {
    view.fill(T::zero())
}

fn ones<T: Element>(view: &mut ArrayViewMutD<'_, T>) {
    view.fill(T::one())
}

/// Element types that coordinate and item buffers can be viewed as.
///
pub trait Element: Copy + Zero + One + Debug + Send + Sync + 'static {
    /// The engine type kind matching this element type
    const KIND: TypeKind;

    #[doc(hidden)]
    fn raw(field: &RawField) -> Option<RawArrayViewMut<Self, IxDyn>>;

    #[doc(hidden)]
    fn wrap(raw: RawArrayViewMut<Self, IxDyn>) -> RawField;

    #[doc(hidden)]
    fn typed(view: FieldViewMut<'_>) -> Option<ArrayViewMutD<'_, Self>>;
}

macro_rules! element {
    ($type:ty, $kind:ident) => {
        impl Element for $type {
            const KIND: TypeKind = TypeKind::$kind;

            fn raw(field: &RawField) -> Option<RawArrayViewMut<Self, IxDyn>> {
                match field {
                    RawField::$kind(raw) => Some(raw.clone()),
                    _ => None,
                }
            }

            fn wrap(raw: RawArrayViewMut<Self, IxDyn>) -> RawField {
                RawField::$kind(raw)
            }

            fn typed(view: FieldViewMut<'_>) -> Option<ArrayViewMutD<'_, Self>> {
                match view {
                    FieldViewMut::$kind(view) => Some(view),
                    _ => None,
                }
            }
        }
    };
}

element!(i32, I4);
element!(f32, R4);
element!(f64, R8);
