//! VARIANT conversions for the COM backend.

use super::NativeValue;
use super::com::DynamicComObject;
use crate::errors::{SageError, SageResult};
use std::mem::ManuallyDrop;
use windows::Win32::Foundation::VARIANT_BOOL;
use windows::Win32::System::Variant::{
    VAR_CHANGE_FLAGS, VARIANT, VT_BOOL, VT_BSTR, VT_DISPATCH, VT_EMPTY, VT_I2, VT_I4,
    VT_I8, VT_INT, VT_NULL, VT_R4, VT_R8, VT_UI1, VT_UI2, VT_UI4, VT_UINT, VariantChangeType,
    VariantClear,
};
use windows::core::BSTR;

/// Builds an owned VARIANT for an outgoing argument.
///
/// The caller must release it with [`clear`] once the call returns.
pub(crate) fn to_variant(value: &NativeValue) -> SageResult<VARIANT> {
    let mut variant = VARIANT::default();
    // SAFETY: We set the `vt` discriminant and the corresponding union field
    // together. The VARIANT is returned by value, so nothing aliases it.
    // The BSTR is owned by the VARIANT and freed by `VariantClear`.
    unsafe {
        let inner = &mut *variant.Anonymous.Anonymous;
        match value {
            NativeValue::Empty => inner.vt = VT_EMPTY,
            NativeValue::Bool(b) => {
                inner.vt = VT_BOOL;
                inner.Anonymous.boolVal = VARIANT_BOOL(if *b { -1 } else { 0 });
            }
            NativeValue::Int(i) => {
                if let Ok(small) = i32::try_from(*i) {
                    inner.vt = VT_I4;
                    inner.Anonymous.lVal = small;
                } else {
                    inner.vt = VT_I8;
                    inner.Anonymous.llVal = *i;
                }
            }
            NativeValue::Float(f) => {
                inner.vt = VT_R8;
                inner.Anonymous.dblVal = *f;
            }
            NativeValue::Text(s) => {
                inner.vt = VT_BSTR;
                inner.Anonymous.bstrVal = ManuallyDrop::new(BSTR::from(s.as_str()));
            }
            NativeValue::Object(_) => {
                return Err(SageError::Unsupported(
                    "passing automation objects as arguments".into(),
                ));
            }
        }
    }
    Ok(variant)
}

/// Releases whatever the VARIANT owns.
pub(crate) fn clear(variant: &mut VARIANT) {
    // SAFETY: `variant` is a valid, initialized VARIANT owned by the caller.
    if let Err(e) = unsafe { VariantClear(variant) } {
        tracing::trace!(error = ?e, "VariantClear failed");
    }
}

/// Copies a returned VARIANT into a [`NativeValue`].
///
/// Dispatch pointers are AddRef'd into a [`DynamicComObject`]; the source
/// VARIANT is left untouched and must still be cleared by the caller.
pub(crate) fn from_variant(variant: &VARIANT) -> SageResult<NativeValue> {
    // SAFETY: The VARIANT was produced by `IDispatch::Invoke`, so `vt`
    // identifies the active union arm.
    unsafe {
        let inner = &*variant.Anonymous.Anonymous;
        let data = &inner.Anonymous;
        let value = match inner.vt {
            VT_EMPTY | VT_NULL => NativeValue::Empty,
            VT_BOOL => NativeValue::Bool(data.boolVal.0 != 0),
            VT_I2 => NativeValue::Int(i64::from(data.iVal)),
            VT_I4 => NativeValue::Int(i64::from(data.lVal)),
            VT_INT => NativeValue::Int(i64::from(data.intVal)),
            VT_I8 => NativeValue::Int(data.llVal),
            VT_UI1 => NativeValue::Int(i64::from(data.bVal)),
            VT_UI2 => NativeValue::Int(i64::from(data.uiVal)),
            VT_UI4 => NativeValue::Int(i64::from(data.ulVal)),
            VT_UINT => NativeValue::Int(i64::from(data.uintVal)),
            VT_R4 => NativeValue::Float(f64::from(data.fltVal)),
            VT_R8 => NativeValue::Float(data.dblVal),
            VT_BSTR => NativeValue::Text(data.bstrVal.to_string()),
            VT_DISPATCH => match data.pdispVal.as_ref() {
                Some(dispatch) => {
                    NativeValue::Object(Box::new(DynamicComObject::new(dispatch.clone())))
                }
                None => NativeValue::Empty,
            },
            _ => {
                let mut text = VARIANT::default();
                VariantChangeType(&mut text, variant, VAR_CHANGE_FLAGS(0), VT_BSTR)?;
                let value = NativeValue::Text((*text.Anonymous.Anonymous).Anonymous.bstrVal.to_string());
                clear(&mut text);
                value
            }
        };
        Ok(value)
    }
}
