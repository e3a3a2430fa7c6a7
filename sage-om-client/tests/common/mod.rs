//! In-memory Sage company used by the integration tests.

#![allow(dead_code)]

use sage_om_client::{
    BindingModule, GenerationResult, InteropProvider, NativeBackend, NativeObject, NativeValue,
    SageError, SageResult, SecretProtector,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct Row {
    pub number: String,
    pub name: Option<String>,
    pub kind: i64,
    pub active: bool,
}

impl Row {
    pub fn new(number: &str, name: &str, kind: i64, active: bool) -> Self {
        Self {
            number: number.into(),
            name: (!name.is_empty()).then(|| name.to_owned()),
            kind,
            active,
        }
    }
}

#[derive(Debug, Default)]
pub struct CompanyState {
    pub rows: Vec<Row>,
    pub fields: HashMap<String, String>,
    pub open: bool,
    pub opens: usize,
    pub closes: usize,
    /// Native failures still to be raised by `FactoryTiers`.
    pub failing_reads: u32,
    /// Native failures still to be raised by `Open()`.
    pub failing_opens: u32,
    /// Threads sessions were created on.
    pub threads: Vec<Option<String>>,
}

#[derive(Clone, Default)]
pub struct Company(Arc<Mutex<CompanyState>>);

impl Company {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        let company = Self::default();
        company.state().rows = rows;
        company
    }

    pub fn state(&self) -> MutexGuard<'_, CompanyState> {
        self.0.lock().unwrap()
    }
}

fn busy() -> SageError {
    SageError::Native {
        code: 0x8001_010A,
        message: "server busy".into(),
    }
}

fn no_member(name: &str) -> SageError {
    SageError::InvalidOperation(format!("no member {name}"))
}

struct Session(Company);

impl NativeObject for Session {
    fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()> {
        self.0
            .state()
            .fields
            .insert(name.into(), value.as_text().unwrap_or_default());
        Ok(())
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        match name {
            "IsOpen" => Ok(NativeValue::Bool(self.0.state().open)),
            "Loggable" => Ok(NativeValue::Object(Box::new(Loggable(self.0.clone())))),
            "FactoryTiers" => {
                let mut state = self.0.state();
                if state.failing_reads > 0 {
                    state.failing_reads -= 1;
                    return Err(busy());
                }
                Ok(NativeValue::Object(Box::new(TiersFactory(self.0.clone()))))
            }
            other => Err(no_member(other)),
        }
    }

    fn invoke(&mut self, method: &str, _args: Vec<NativeValue>) -> SageResult<NativeValue> {
        let mut state = self.0.state();
        match method {
            "Open" => {
                state.opens += 1;
                if state.failing_opens > 0 {
                    state.failing_opens -= 1;
                    return Err(busy());
                }
                state.open = true;
            }
            "Close" => {
                state.closes += 1;
                state.open = false;
            }
            other => return Err(no_member(other)),
        }
        Ok(NativeValue::Empty)
    }
}

struct Loggable(Company);

impl NativeObject for Loggable {
    fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()> {
        self.0
            .state()
            .fields
            .insert(format!("Loggable.{name}"), value.as_text().unwrap_or_default());
        Ok(())
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        Err(no_member(name))
    }

    fn invoke(&mut self, method: &str, _args: Vec<NativeValue>) -> SageResult<NativeValue> {
        Err(no_member(method))
    }
}

struct TiersFactory(Company);

impl TiersFactory {
    fn select(&self, keep: impl Fn(&Row) -> bool) -> NativeValue {
        let mut rows: Vec<Row> = self.0.state().rows.iter().filter(|r| keep(r)).cloned().collect();
        rows.sort_by(|a, b| a.number.cmp(&b.number));
        NativeValue::Object(Box::new(Collection(rows)))
    }

    fn find(&self, number: &str) -> Option<Row> {
        self.0.state().rows.iter().find(|r| r.number == number).cloned()
    }
}

impl NativeObject for TiersFactory {
    fn set_field(&mut self, name: &str, _value: NativeValue) -> SageResult<()> {
        Err(no_member(name))
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        match name {
            "ListOrderNumero" => Ok(self.select(|_| true)),
            other => Err(no_member(other)),
        }
    }

    fn invoke(&mut self, method: &str, args: Vec<NativeValue>) -> SageResult<NativeValue> {
        match method {
            "QueryActifOrderNumero" => Ok(self.select(|r| r.active)),
            "QueryTypeNumeroOrderNumero" => {
                let kind = args.first().map(NativeValue::as_int).transpose()?;
                let from = args.get(1).and_then(NativeValue::as_text).unwrap_or_default();
                let to = args.get(2).and_then(NativeValue::as_text).unwrap_or_default();
                Ok(self.select(|r| Some(r.kind) == kind && r.number >= from && r.number <= to))
            }
            "ExistNumero" => {
                let number = args.first().and_then(NativeValue::as_text).unwrap_or_default();
                Ok(NativeValue::Bool(self.find(&number).is_some()))
            }
            "ReadNumero" => {
                let number = args.first().and_then(NativeValue::as_text).unwrap_or_default();
                let row = self.find(&number).ok_or_else(|| SageError::Native {
                    code: 0x8000_4005,
                    message: format!("{number} does not exist"),
                })?;
                Ok(NativeValue::Object(Box::new(Record(row))))
            }
            other => Err(no_member(other)),
        }
    }
}

struct Collection(Vec<Row>);

impl NativeObject for Collection {
    fn set_field(&mut self, name: &str, _value: NativeValue) -> SageResult<()> {
        Err(no_member(name))
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        match name {
            "Count" => Ok(NativeValue::Int(i64::try_from(self.0.len()).unwrap())),
            other => Err(no_member(other)),
        }
    }

    fn invoke(&mut self, method: &str, args: Vec<NativeValue>) -> SageResult<NativeValue> {
        if method != "Item" {
            return Err(no_member(method));
        }
        let index = args.first().map(NativeValue::as_int).transpose()?.unwrap_or(0);
        usize::try_from(index - 1)
            .ok()
            .and_then(|i| self.0.get(i))
            .map(|row| NativeValue::Object(Box::new(Record(row.clone()))))
            .ok_or_else(|| SageError::Native {
                code: 0x8002_000B,
                message: format!("index {index} out of range"),
            })
    }
}

struct Record(Row);

impl NativeObject for Record {
    fn set_field(&mut self, name: &str, _value: NativeValue) -> SageResult<()> {
        Err(no_member(name))
    }

    fn get_field(&self, name: &str) -> SageResult<NativeValue> {
        match name {
            "CT_Num" => Ok(NativeValue::Text(self.0.number.clone())),
            "CT_Intitule" => Ok(self.0.name.clone().map_or(NativeValue::Empty, NativeValue::Text)),
            other => Err(no_member(other)),
        }
    }

    fn invoke(&mut self, method: &str, _args: Vec<NativeValue>) -> SageResult<NativeValue> {
        Err(no_member(method))
    }
}

/// Backend with no typed binding and one registered identifier.
pub struct CompanyBackend {
    pub company: Company,
    pub registered: Option<String>,
}

impl CompanyBackend {
    pub fn new(company: Company) -> Self {
        Self {
            company,
            registered: Some(format!("{}.3", sage_om_client::BASE_IDENTIFIER)),
        }
    }

    pub fn unregistered(company: Company) -> Self {
        Self {
            company,
            registered: None,
        }
    }
}

impl NativeBackend for CompanyBackend {
    fn load_binding(&self, path: &Path) -> SageResult<Box<dyn BindingModule>> {
        Err(SageError::BindingLoad(format!("{} is not loadable here", path.display())))
    }

    fn is_registered(&self, identifier: &str) -> bool {
        self.registered.as_deref() == Some(identifier)
    }

    fn create_instance(&self, _identifier: &str) -> SageResult<Box<dyn NativeObject>> {
        let name = std::thread::current().name().map(str::to_owned);
        self.company.state().threads.push(name);
        Ok(Box::new(Session(self.company.clone())))
    }
}

/// Interop provider for a machine without the component installed.
pub struct NoInterop;

impl InteropProvider for NoInterop {
    fn generate_or_get(&self) -> GenerationResult {
        GenerationResult {
            success: false,
            message: "objets100c.dll not found".into(),
            interop_path: None,
            component_path: None,
            component_version: None,
        }
    }
}

/// Reversible stand-in for the machine protector.
pub struct ReversingProtector;

impl SecretProtector for ReversingProtector {
    fn encrypt(&self, plain: &str) -> SageResult<String> {
        if plain.is_empty() || self.is_protected(plain) {
            return Ok(plain.to_owned());
        }
        Ok(format!("ENC:{}", plain.chars().rev().collect::<String>()))
    }

    fn decrypt(&self, protected: &str) -> SageResult<String> {
        match protected.strip_prefix("ENC:") {
            Some(body) => Ok(body.chars().rev().collect()),
            None => Ok(protected.to_owned()),
        }
    }
}
