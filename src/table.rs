use crate::trap::Trap;
use crate::types::{RefType, TableType};
use crate::values::Value;

/// A table instance: a growable run of reference slots, initialized to the
/// null of its element type.
#[derive(Debug, Clone)]
pub struct TableInstance {
    ty: TableType,
    elems: Vec<Value>,
}

impl TableInstance {
    pub fn new(ty: TableType) -> Self {
        let null = Value::null_ref(ty.elem);
        Self {
            ty,
            elems: vec![null; ty.limits.min as usize],
        }
    }

    pub fn ty(&self) -> &TableType {
        &self.ty
    }

    pub fn elem_type(&self) -> RefType {
        self.ty.elem
    }

    pub fn size(&self) -> u32 {
        self.elems.len() as u32
    }

    pub fn get(&self, index: u32) -> Result<Value, Trap> {
        self.elems
            .get(index as usize)
            .copied()
            .ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&mut self, index: u32, value: Value) -> Result<(), Trap> {
        let slot = self
            .elems
            .get_mut(index as usize)
            .ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Grow by `delta` slots filled with `init`, returning the previous
    /// size, or `None` when the declared maximum (or the index space)
    /// would be exceeded. State is untouched on failure.
    pub fn grow(&mut self, delta: u32, init: Value) -> Option<u32> {
        let old = self.size();
        let new = old.checked_add(delta)?;
        if let Some(max) = self.ty.limits.max {
            if new > max {
                return None;
            }
        }
        self.elems.resize(new as usize, init);
        Some(old)
    }

    /// Fill `[offset, offset+len)` with `value`; checks bounds before
    /// writing anything.
    pub fn fill(&mut self, offset: u32, len: u32, value: Value) -> Result<(), Trap> {
        let end = (offset as u64) + (len as u64);
        if end > self.elems.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        self.elems[offset as usize..end as usize].fill(value);
        Ok(())
    }

    pub(crate) fn elems(&self) -> &[Value] {
        &self.elems
    }

    pub(crate) fn elems_mut(&mut self) -> &mut [Value] {
        &mut self.elems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    fn table(min: u32, max: Option<u32>) -> TableInstance {
        TableInstance::new(TableType {
            elem: RefType::FuncRef,
            limits: Limits::new(min, max),
        })
    }

    #[test]
    fn slots_start_null_of_the_element_type() {
        let t = table(3, None);
        assert_eq!(t.size(), 3);
        for i in 0..3 {
            assert_eq!(t.get(i).unwrap(), Value::FuncRef(None));
        }
        assert_eq!(t.get(3).unwrap_err(), Trap::TableOutOfBounds);
    }

    #[test]
    fn grow_with_null_init_fills_with_null() {
        let mut t = table(1, Some(4));
        assert_eq!(t.grow(2, Value::null_ref(RefType::FuncRef)), Some(1));
        assert_eq!(t.size(), 3);
        assert!(t.get(2).unwrap().is_null_ref());
        // Exceeding the declared maximum fails and changes nothing.
        assert_eq!(t.grow(2, Value::null_ref(RefType::FuncRef)), None);
        assert_eq!(t.size(), 3);
    }
}
