//! Host values and the slot table that names them.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::error::{HostError, HostResult};

/// Handler behind a callable host value.
pub type Handler = Rc<dyn Fn(&[HostValue]) -> HostResult<HostValue>>;

/// A host function or constructor.
#[derive(Clone)]
pub struct Callable {
    name: &'static str,
    handler: Handler,
}

impl Callable {
    pub fn new(name: &'static str, handler: impl Fn(&[HostValue]) -> HostResult<HostValue> + 'static) -> Self {
        Self {
            name,
            handler: Rc::new(handler),
        }
    }

    /// A callable that fails naming itself when invoked.
    pub fn unimplemented(name: &'static str) -> Self {
        Self::new(name, move |_| Err(HostError::Unimplemented(name)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn call(&self, args: &[HostValue]) -> HostResult<HostValue> {
        (self.handler)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// The object kinds.
#[derive(Debug)]
pub enum HostObject {
    /// A property map.
    Plain(RefCell<BTreeMap<String, HostValue>>),
    Callable(Callable),
    /// A handle the program can pass around but not inspect.
    Opaque(String),
}

/// A value visible to the program through the `syscall/js` bridge.
#[derive(Debug, Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Rc<HostObject>),
    Array(Rc<RefCell<Vec<HostValue>>>),
}

/// Reference identity of a string, object or array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(usize);

impl HostValue {
    /// A plain object with the given properties.
    pub fn object<K: Into<String>>(props: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        let map = props.into_iter().map(|(k, v)| (k.into(), v)).collect();
        HostValue::Object(Rc::new(HostObject::Plain(RefCell::new(map))))
    }

    pub fn callable(callable: Callable) -> Self {
        HostValue::Object(Rc::new(HostObject::Callable(callable)))
    }

    pub fn array(items: Vec<HostValue>) -> Self {
        HostValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn string(s: &str) -> Self {
        HostValue::String(Rc::from(s))
    }

    /// Identity for reference values; `None` for primitives.
    pub fn identity(&self) -> Option<Identity> {
        let addr = match self {
            HostValue::String(s) => Rc::as_ptr(s) as *const u8 as usize,
            HostValue::Object(o) => Rc::as_ptr(o) as *const u8 as usize,
            HostValue::Array(a) => Rc::as_ptr(a) as *const u8 as usize,
            _ => return None,
        };
        Some(Identity(addr))
    }

    /// Property `name` of a plain object.
    pub fn get(&self, name: &str) -> Option<HostValue> {
        match self {
            HostValue::Object(obj) => match obj.as_ref() {
                HostObject::Plain(props) => props.borrow().get(name).cloned(),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_plain_object(&self) -> bool {
        matches!(self, HostValue::Object(obj) if matches!(obj.as_ref(), HostObject::Plain(_)))
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            HostValue::Object(obj) => match obj.as_ref() {
                HostObject::Callable(callable) => Some(callable),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Fixed slots at the start of every [`ValueTable`].
pub mod slot {
    pub const NAN: u32 = 0;
    pub const UNDEFINED: u32 = 1;
    pub const NULL: u32 = 2;
    pub const TRUE: u32 = 3;
    pub const FALSE: u32 = 4;
    pub const GLOBAL: u32 = 5;
    pub const MEM: u32 = 6;
    pub const THIS: u32 = 7;
}

/// Append-only table of host values plus an identity index.
///
/// The seeded slots are not entered in the identity index, so storing one of
/// those objects again allocates a fresh slot, exactly as the JavaScript side
/// does when it replays the log.
#[derive(Debug)]
pub struct ValueTable {
    values: Vec<HostValue>,
    index: HashMap<Identity, u32>,
}

impl ValueTable {
    /// The eight seeded slots: NaN, undefined, null, true, false, the global
    /// object, the memory view and the runtime object.
    pub fn seeded(global: HostValue) -> Self {
        Self {
            values: vec![
                HostValue::Number(f64::NAN),
                HostValue::Undefined,
                HostValue::Null,
                HostValue::Bool(true),
                HostValue::Bool(false),
                global,
                HostValue::object::<String>([]),
                HostValue::object::<String>([]),
            ],
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[HostValue] {
        &self.values
    }

    pub fn get(&self, slot: u32) -> HostResult<&HostValue> {
        self.values
            .get(slot as usize)
            .ok_or(HostError::BadValueIndex(slot))
    }

    /// Slot of a reference value, allocating one on first sight. Returns the
    /// slot and whether it was newly allocated.
    pub fn intern(&mut self, value: &HostValue) -> HostResult<(u32, bool)> {
        let identity = value
            .identity()
            .ok_or_else(|| HostError::BadArgument(format!("{value:?} has no identity")))?;
        if let Some(slot) = self.index.get(&identity) {
            return Ok((*slot, false));
        }
        let slot = self.values.len() as u32;
        self.values.push(value.clone());
        self.index.insert(identity, slot);
        Ok((slot, true))
    }

    /// Identity index entries ordered by slot.
    pub fn identity_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self.index.values().copied().collect();
        slots.sort_unstable();
        slots
    }
}
