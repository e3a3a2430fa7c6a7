//! COM backend: type-library loading, ProgID activation and `IDispatch` calls.

use super::variant::{clear, from_variant, to_variant};
use super::{BindingModule, ComBackend, ExportedType, NativeBackend, NativeObject, NativeValue, TypeKind};
use crate::errors::{SageError, SageResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use windows::Win32::System::Com::{
    CLSCTX_ALL, CLSIDFromProgID, CoCreateInstance, DISPATCH_FLAGS, DISPATCH_METHOD,
    DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO, IDispatch, ITypeInfo,
    ITypeLib, TKIND_COCLASS, TKIND_DISPATCH, TKIND_INTERFACE,
};
use windows::Win32::System::Ole::{DISPID_PROPERTYPUT, LoadTypeLibEx, REGKIND_NONE};
use windows::Win32::System::Variant::VARIANT;
use windows::core::{BSTR, GUID, HSTRING, IUnknown, PCWSTR};

/// LCID used for member-name lookups (en-US).
const LOCALE_EN_US: u32 = 0x0409;

/// Where DISPIDs come from.
enum MemberSource {
    /// The default interface's `ITypeInfo` from a loaded binding.
    TypeInfo(ITypeInfo),
    /// `IDispatch::GetIDsOfNames` at call time.
    Runtime,
}

/// Shared `IDispatch` plumbing with a per-object DISPID cache.
struct DispatchCore {
    dispatch: IDispatch,
    source: MemberSource,
    dispids: RefCell<HashMap<String, i32>>,
}

impl DispatchCore {
    fn dispid(&self, name: &str) -> SageResult<i32> {
        if let Some(id) = self.dispids.borrow().get(name) {
            return Ok(*id);
        }

        let wide = HSTRING::from(name);
        let names = [PCWSTR::from_raw(wide.as_ptr())];
        let mut id = -1i32;

        // SAFETY: `names` holds one valid null-terminated wide string that
        // outlives the call, and `id` is a valid out-pointer.
        unsafe {
            match &self.source {
                MemberSource::TypeInfo(info) => info.GetIDsOfNames(names.as_ptr(), 1, &mut id)?,
                MemberSource::Runtime => self.dispatch.GetIDsOfNames(
                    &GUID::zeroed(),
                    names.as_ptr(),
                    1,
                    LOCALE_EN_US,
                    &mut id,
                )?,
            }
        }

        self.dispids.borrow_mut().insert(name.to_owned(), id);
        Ok(id)
    }

    fn call(&self, name: &str, flags: DISPATCH_FLAGS, args: &[NativeValue]) -> SageResult<NativeValue> {
        let dispid = self.dispid(name)?;

        // IDispatch expects arguments right-to-left.
        let mut variants = args
            .iter()
            .rev()
            .map(to_variant)
            .collect::<SageResult<Vec<VARIANT>>>()?;

        let mut named = DISPID_PROPERTYPUT;
        let is_put = flags == DISPATCH_PROPERTYPUT;
        let params = DISPPARAMS {
            rgvarg: if variants.is_empty() {
                std::ptr::null_mut()
            } else {
                variants.as_mut_ptr()
            },
            rgdispidNamedArgs: if is_put { &mut named } else { std::ptr::null_mut() },
            #[allow(clippy::cast_possible_truncation)]
            cArgs: variants.len() as u32,
            cNamedArgs: u32::from(is_put),
        };

        let mut result = VARIANT::default();
        let mut excep = EXCEPINFO::default();
        let mut arg_err = 0u32;

        // SAFETY: `params` points into `variants` and `named`, both alive for
        // the duration of the call; the out-pointers are valid locals.
        let outcome = unsafe {
            self.dispatch.Invoke(
                dispid,
                &GUID::zeroed(),
                LOCALE_EN_US,
                flags,
                &params,
                Some(&mut result),
                Some(&mut excep),
                Some(&mut arg_err),
            )
        };

        for v in &mut variants {
            clear(v);
        }

        if let Err(e) = outcome {
            let mut err = SageError::from(e);
            if let SageError::Native { message, .. } = &mut err {
                let description = excep.bstrDescription.to_string();
                if !description.is_empty() {
                    *message = format!("{name}: {description}");
                } else {
                    *message = format!("{name}: {message}");
                }
            }
            clear(&mut result);
            return Err(err);
        }

        let value = from_variant(&result);
        clear(&mut result);
        value
    }
}

fn put(core: &DispatchCore, name: &str, value: NativeValue) -> SageResult<()> {
    core.call(name, DISPATCH_PROPERTYPUT, &[value]).map(drop)
}

fn get(core: &DispatchCore, name: &str) -> SageResult<NativeValue> {
    // Parameterless methods such as `QueryActifOrderNumero` are commonly read
    // as properties by automation clients; allow both.
    core.call(name, DISPATCH_PROPERTYGET | DISPATCH_METHOD, &[])
}

fn invoke(core: &DispatchCore, method: &str, args: &[NativeValue]) -> SageResult<NativeValue> {
    core.call(method, DISPATCH_METHOD | DISPATCH_PROPERTYGET, args)
}

/// Automation object created through a typed binding.
pub(crate) struct TypedComObject(DispatchCore);

impl TypedComObject {
    fn new(dispatch: IDispatch) -> SageResult<Self> {
        // SAFETY: Plain COM call on a live interface; index 0 is the default
        // interface's type info.
        let info = unsafe { dispatch.GetTypeInfo(0, LOCALE_EN_US)? };
        Ok(Self(DispatchCore {
            dispatch,
            source: MemberSource::TypeInfo(info),
            dispids: RefCell::default(),
        }))
    }
}

impl NativeObject for TypedComObject {
    fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()> {
        put(&self.0, name, value)
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        get(&self.0, name)
    }

    fn invoke(&mut self, method: &str, args: Vec<NativeValue>) -> SageResult<NativeValue> {
        invoke(&self.0, method, &args)
    }
}

/// Automation object resolved at runtime (ProgID activation or returned by
/// another object).
pub(crate) struct DynamicComObject(DispatchCore);

impl DynamicComObject {
    pub(crate) fn new(dispatch: IDispatch) -> Self {
        Self(DispatchCore {
            dispatch,
            source: MemberSource::Runtime,
            dispids: RefCell::default(),
        })
    }
}

impl NativeObject for DynamicComObject {
    fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()> {
        put(&self.0, name, value)
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        get(&self.0, name)
    }

    fn invoke(&mut self, method: &str, args: Vec<NativeValue>) -> SageResult<NativeValue> {
        invoke(&self.0, method, &args)
    }
}

/// A loaded type library.
struct TypeLibModule {
    lib: ITypeLib,
}

impl TypeLibModule {
    #[allow(clippy::cast_possible_wrap)]
    fn type_name(&self, index: u32) -> SageResult<String> {
        let mut name = BSTR::new();
        let mut help_context = 0u32;
        // SAFETY: Out-pointers are valid locals; unused outputs are `None`.
        unsafe {
            self.lib
                .GetDocumentation(index as i32, Some(&mut name), None, &mut help_context, None)?;
        }
        Ok(name.to_string())
    }
}

impl BindingModule for TypeLibModule {
    fn exported_types(&self) -> Vec<ExportedType> {
        // SAFETY: Plain COM calls on a live ITypeLib.
        let count = unsafe { self.lib.GetTypeInfoCount() };
        (0..count)
            .filter_map(|index| {
                let name = self.type_name(index).ok()?;
                // SAFETY: `index` is within `GetTypeInfoCount()`.
                let kind = match unsafe { self.lib.GetTypeInfoType(index) } {
                    Ok(TKIND_COCLASS) => TypeKind::Class,
                    Ok(TKIND_DISPATCH | TKIND_INTERFACE) => TypeKind::Interface,
                    _ => TypeKind::Other,
                };
                Some(ExportedType::new(name, kind))
            })
            .collect()
    }

    fn instantiate(&self, class: &ExportedType) -> SageResult<Box<dyn NativeObject>> {
        // SAFETY: Plain COM calls on a live ITypeLib.
        let count = unsafe { self.lib.GetTypeInfoCount() };
        let index = (0..count)
            .find(|i| self.type_name(*i).is_ok_and(|n| n == class.name))
            .ok_or_else(|| SageError::BindingLoad(format!("type {} not in binding", class.name)))?;

        // SAFETY: `index` is valid; the TYPEATTR is released right after the
        // CLSID is copied out of it.
        let clsid = unsafe {
            let info = self.lib.GetTypeInfo(index)?;
            let attr = info.GetTypeAttr()?;
            let guid = (*attr).guid;
            info.ReleaseTypeAttr(attr);
            guid
        };

        // SAFETY: `clsid` comes from the type library; no aggregation.
        let dispatch: IDispatch = unsafe { CoCreateInstance(&clsid, None::<&IUnknown>, CLSCTX_ALL)? };
        Ok(Box::new(TypedComObject::new(dispatch)?))
    }
}

impl NativeBackend for ComBackend {
    fn load_binding(&self, path: &Path) -> SageResult<Box<dyn BindingModule>> {
        let wide = HSTRING::from(path.as_os_str());
        // SAFETY: `wide` is a valid null-terminated path for the call duration.
        let lib = unsafe { LoadTypeLibEx(&wide, REGKIND_NONE) }.map_err(|e| {
            SageError::BindingLoad(format!("{}: {}", path.display(), e.message()))
        })?;
        Ok(Box::new(TypeLibModule { lib }))
    }

    fn is_registered(&self, identifier: &str) -> bool {
        // SAFETY: The HSTRING is null-terminated and alive for the call.
        unsafe { CLSIDFromProgID(&HSTRING::from(identifier)) }.is_ok()
    }

    fn create_instance(&self, identifier: &str) -> SageResult<Box<dyn NativeObject>> {
        // SAFETY: The HSTRING is null-terminated and alive for the call; the
        // CLSID comes straight from the registry.
        let dispatch: IDispatch = unsafe {
            let clsid = CLSIDFromProgID(&HSTRING::from(identifier))?;
            CoCreateInstance(&clsid, None::<&IUnknown>, CLSCTX_ALL)?
        };
        Ok(Box::new(DynamicComObject::new(dispatch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apartment::ApartmentGuard;

    /// Ships with every Windows install and embeds a type library the same
    /// way the accounting component does.
    fn system_type_library() -> std::path::PathBuf {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| r"C:\Windows".into());
        Path::new(&root).join("System32").join("stdole2.tlb")
    }

    #[test]
    fn loads_embedded_type_library() {
        let _sta = ApartmentGuard::enter().unwrap();
        let module = ComBackend.load_binding(&system_type_library()).unwrap();
        let types = module.exported_types();
        assert!(
            types.iter().any(|t| t.name == "StdFont" && t.kind == TypeKind::Class),
            "{types:?}"
        );
        assert!(types.iter().any(|t| t.kind == TypeKind::Interface));
    }

    #[test]
    fn file_without_type_library_is_a_binding_error() {
        let _sta = ApartmentGuard::enter().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let assembly = dir.path().join("Objets100cLib_12_0_1_0.dll");
        std::fs::write(&assembly, b"not a type library").unwrap();

        let err = ComBackend.load_binding(&assembly).err().unwrap();
        assert!(matches!(err, SageError::BindingLoad(_)), "{err}");
    }
}
