//! Capability-typed seam over the Objets Métiers automation objects.
//!
//! Sessions, factories, collections and records are all exposed through
//! [`NativeObject`]. Two families of implementations exist on Windows: one
//! whose members are resolved through a loaded type library (typed binding)
//! and one resolved purely at runtime through `IDispatch` (late binding).

use crate::errors::{SageError, SageResult};
use std::fmt;
use std::path::Path;

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

#[cfg(windows)]
mod com;
#[cfg(windows)]
mod variant;

/// Value crossing the native boundary.
pub enum NativeValue {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Object(Box<dyn NativeObject>),
}

impl NativeValue {
    /// Textual form for scalar values; `None` for `Empty` and objects.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Empty | Self::Object(_) => None,
        }
    }

    pub fn as_int(&self) -> SageResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) => Ok(*f as i64),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| SageError::InvalidOperation(format!("expected integer, got {s:?}"))),
            other => Err(SageError::InvalidOperation(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }

    pub fn as_bool(&self) -> SageResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(i) => Ok(*i != 0),
            other => Err(SageError::InvalidOperation(format!(
                "expected boolean, got {other:?}"
            ))),
        }
    }

    pub fn into_object(self) -> SageResult<Box<dyn NativeObject>> {
        match self {
            Self::Object(obj) => Ok(obj),
            other => Err(SageError::InvalidOperation(format!(
                "expected object, got {other:?}"
            ))),
        }
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Minimal verb set over a live automation object.
///
/// Implementations are bound to the thread that created them and are
/// therefore neither `Send` nor `Sync`.
pub trait NativeObject {
    /// Calls the object's `Open()` method.
    fn open(&mut self) -> SageResult<()> {
        self.invoke("Open", Vec::new()).map(drop)
    }

    /// Calls the object's `Close()` method.
    fn close(&mut self) -> SageResult<()> {
        self.invoke("Close", Vec::new()).map(drop)
    }

    /// Reads the object's `IsOpen` property.
    fn is_open(&self) -> SageResult<bool> {
        self.get_field("IsOpen")?.as_bool()
    }

    /// Property put.
    fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()>;

    /// Property get.
    fn get_field(&self, name: &str) -> SageResult<NativeValue>;

    /// Method call. Arguments are given in declaration order.
    fn invoke(&mut self, method: &str, args: Vec<NativeValue>) -> SageResult<NativeValue>;
}

/// Sets `value` on a dotted member path such as `Loggable.UserName`.
pub fn set_path(
    target: &mut dyn NativeObject,
    path: &str,
    value: NativeValue,
) -> SageResult<()> {
    match path.split_once('.') {
        None => target.set_field(path, value),
        Some((head, rest)) => {
            let mut child = target.get_field(head)?.into_object()?;
            set_path(child.as_mut(), rest, value)
        }
    }
}

/// Kind of a type exported by a loaded binding module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Creatable concrete class (coclass).
    Class,
    /// Interface only; instances must come from identifier resolution.
    Interface,
    Other,
}

/// A type exported by a loaded binding module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedType {
    pub name: String,
    pub kind: TypeKind,
}

impl ExportedType {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A loaded typed binding.
pub trait BindingModule {
    /// Every type the binding exposes.
    fn exported_types(&self) -> Vec<ExportedType>;

    /// Creates a live instance through a concrete class of this module.
    fn instantiate(&self, class: &ExportedType) -> SageResult<Box<dyn NativeObject>>;
}

/// Platform entry points used by the connection strategies.
#[cfg_attr(any(test, feature = "test-support"), automock)]
pub trait NativeBackend: Send + Sync {
    /// Loads the typed binding stored at `path`.
    fn load_binding(&self, path: &Path) -> SageResult<Box<dyn BindingModule>>;

    /// Whether `identifier` resolves to a registered, loadable type.
    fn is_registered(&self, identifier: &str) -> bool;

    /// Creates a live instance for a registered identifier.
    fn create_instance(&self, identifier: &str) -> SageResult<Box<dyn NativeObject>>;
}

/// COM implementation of [`NativeBackend`].
///
/// On non-Windows targets every entry point reports [`SageError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ComBackend;

#[cfg(not(windows))]
impl NativeBackend for ComBackend {
    fn load_binding(&self, path: &Path) -> SageResult<Box<dyn BindingModule>> {
        Err(SageError::Unsupported(format!(
            "cannot load {}: COM type libraries require Windows",
            path.display()
        )))
    }

    fn is_registered(&self, _identifier: &str) -> bool {
        false
    }

    fn create_instance(&self, identifier: &str) -> SageResult<Box<dyn NativeObject>> {
        Err(SageError::Unsupported(format!(
            "cannot resolve {identifier}: COM activation requires Windows"
        )))
    }
}
