// src/extension.rs
use std::any::Any;

struct Extension {
    name: String,
    payload: Box<dyn Any + Send>,
}

/// Name-addressed payloads owned by a connection.
///
/// Payloads are dropped when detached, replaced, or when the owning
/// connection is freed; their `Drop` impls act as destructors.
#[derive(Default)]
pub struct Extensions {
    entries: Vec<Extension>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `payload` under `name`. An existing payload with that name is
    /// replaced and returned.
    pub fn attach<T: Any + Send>(
        &mut self,
        name: &str,
        payload: T,
    ) -> Option<Box<dyn Any + Send>> {
        let payload: Box<dyn Any + Send> = Box::new(payload);
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => Some(std::mem::replace(&mut entry.payload, payload)),
            None => {
                self.entries.push(Extension {
                    name: name.to_owned(),
                    payload,
                });
                None
            }
        }
    }

    /// Look up a payload by name and type.
    pub fn get<T: Any + Send>(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.payload.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send>(&mut self, name: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .and_then(|e| e.payload.downcast_mut::<T>())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Remove a payload, handing ownership back to the caller.
    pub fn detach(&mut self, name: &str) -> Option<Box<dyn Any + Send>> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx).payload)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every payload, most recently attached first. Returns how many
    /// were destroyed.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        while self.entries.pop().is_some() {}
        n
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
