//! PDF dictionary implementation

use indexmap::map::{IndexMap, Iter, IterMut};

use super::{Object, ObjectId};

/// PDF dictionary object
///
/// Keys are name bytes without the leading slash. Insertion order is kept so
/// that a parsed dictionary serializes back in its original key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: IndexMap<Vec<u8>, Object>,
}

impl Dictionary {
    /// Create new dictionary
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Get value by key
    pub fn get(&self, key: &str) -> Option<&Object> {
        self.entries.get(key.as_bytes())
    }

    /// Get mutable value by key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Object> {
        self.entries.get_mut(key.as_bytes())
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key.as_bytes())
    }

    /// Set value, replacing an existing entry in place
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Object>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Remove an entry, keeping the order of the remaining keys
    pub fn remove(&mut self, key: &str) -> Option<Object> {
        self.entries.shift_remove(key.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Vec<u8>, Object> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, Vec<u8>, Object> {
        self.entries.iter_mut()
    }

    /// Get integer value
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Object::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Get numeric value, integer or real
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|value| value.as_f64().ok())
    }

    /// Get name value as text
    pub fn get_name(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|value| value.as_name_str().ok())
    }

    /// Get string bytes
    pub fn get_string(&self, key: &str) -> Option<&[u8]> {
        match self.get(key) {
            Some(Object::String(s, _)) => Some(s),
            _ => None,
        }
    }

    /// Get reference value
    pub fn get_reference(&self, key: &str) -> Option<ObjectId> {
        match self.get(key) {
            Some(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    }

    /// Get a direct nested dictionary
    pub fn get_dict(&self, key: &str) -> Option<&Dictionary> {
        match self.get(key) {
            Some(Object::Dictionary(d)) => Some(d),
            _ => None,
        }
    }

    /// Get a direct array
    pub fn get_array(&self, key: &str) -> Option<&Vec<Object>> {
        match self.get(key) {
            Some(Object::Array(a)) => Some(a),
            _ => None,
        }
    }

    /// Check the `/Type` entry
    pub fn type_is(&self, type_name: &str) -> bool {
        self.get_name("Type") == Some(type_name)
    }

    /// Copy entries from `parent` that this dictionary does not define
    pub fn inherit_from(&mut self, parent: &Dictionary) {
        for (key, value) in parent.iter() {
            if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), value.clone());
            }
        }
    }

    /// Collect every reference reachable without leaving this dictionary
    pub fn collect_references(&self, out: &mut Vec<ObjectId>) {
        for value in self.entries.values() {
            value.collect_references(out);
        }
    }
}

impl FromIterator<(Vec<u8>, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Object)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Build a [`Dictionary`] from `key => value` pairs
#[macro_export]
macro_rules! dictionary {
    () => {
        $crate::pdf::Dictionary::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut dict = $crate::pdf::Dictionary::new();
        $(dict.set($key, $value);)+
        dict
    }};
}
