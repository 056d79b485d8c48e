//! Data objects exchanged between the pipeline and operator scripts.
//!
//! A [`DataHandle`] is the unit that flows through the core: the input
//! volume handed to an operator, the secondary results it returns, and the
//! child datasets it spawns. Handles are shared (`Arc`) so a script may
//! mutate its input in place and the pipeline sees the change.

mod image;
mod table;

pub use image::ImageData;
pub use table::Table;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Kind of payload carried by a [`DataObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Image,
    Table,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Image => write!(f, "image"),
            DataKind::Table => write!(f, "table"),
        }
    }
}

/// A volumetric image or a tabular result.
#[derive(Debug, Clone, PartialEq)]
pub enum DataObject {
    Image(ImageData),
    Table(Table),
}

impl DataObject {
    pub fn kind(&self) -> DataKind {
        match self {
            DataObject::Image(_) => DataKind::Image,
            DataObject::Table(_) => DataKind::Table,
        }
    }

    pub fn as_image(&self) -> Option<&ImageData> {
        match self {
            DataObject::Image(img) => Some(img),
            DataObject::Table(_) => None,
        }
    }

    pub fn as_image_mut(&mut self) -> Option<&mut ImageData> {
        match self {
            DataObject::Image(img) => Some(img),
            DataObject::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            DataObject::Table(t) => Some(t),
            DataObject::Image(_) => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut Table> {
        match self {
            DataObject::Table(t) => Some(t),
            DataObject::Image(_) => None,
        }
    }
}

/// Shared, mutable handle to a [`DataObject`].
///
/// Cloning a handle is cheap and yields another reference to the same
/// object. Use [`DataHandle::deep_copy`] for an independent object.
#[derive(Clone)]
pub struct DataHandle(Arc<RwLock<DataObject>>);

impl DataHandle {
    pub fn new(object: DataObject) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    pub fn from_image(image: ImageData) -> Self {
        Self::new(DataObject::Image(image))
    }

    pub fn from_table(table: Table) -> Self {
        Self::new(DataObject::Table(table))
    }

    /// Acquire shared access. A poisoned lock is recovered; data objects
    /// hold no invariants a panicking writer could break halfway.
    pub fn read(&self) -> RwLockReadGuard<'_, DataObject> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, DataObject> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> DataKind {
        self.read().kind()
    }

    /// True if both handles refer to the same underlying object.
    pub fn ptr_eq(&self, other: &DataHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Clone the current contents into a new, independent handle.
    pub fn deep_copy(&self) -> DataHandle {
        DataHandle::new(self.read().clone())
    }

    /// Clone the current contents out of the handle.
    pub fn snapshot(&self) -> DataObject {
        self.read().clone()
    }
}

impl fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.read() {
            DataObject::Image(img) => f
                .debug_struct("DataHandle")
                .field("kind", &DataKind::Image)
                .field("dims", &img.dims())
                .finish(),
            DataObject::Table(t) => f
                .debug_struct("DataHandle")
                .field("kind", &DataKind::Table)
                .field("columns", &t.columns())
                .field("rows", &t.row_count())
                .finish(),
        }
    }
}

impl fmt::Display for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.read() {
            DataObject::Image(img) => {
                let [x, y, z] = img.dims();
                write!(f, "image({}x{}x{})", x, y, z)
            }
            DataObject::Table(t) => write!(f, "table({} rows)", t.row_count()),
        }
    }
}
