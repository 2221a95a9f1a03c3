//! Field access for heap objects laid out by the code generator.
//!
//! An [`ObjRef<K>`] is a tagged reference that has been checked once, at
//! construction, to be non-null and to carry kind `K`'s tag. Fixed-field
//! access after that is a plain load or store at `unbox(obj) + offset`; tail
//! access is `unsafe` because indexes are not compared with the stored count.

use std::fmt;
use std::marker::PhantomData;

use rt_abi::{
    ARR_ARR_OFFSET, ARR_LAYOUT, ARR_LEN_OFFSET, ARR_PROTO_OFFSET, ARR_TBL_OFFSET, ARRTBL_LAYOUT,
    ARRTBL_SIZE_OFFSET, ARRTBL_TBL_OFFSET, ARRTBL_TBL_STRIDE, CELL_LAYOUT, CELL_VAL_OFFSET,
    CLOS_CELLS_OFFSET, CLOS_CELLS_STRIDE, CLOS_FUNCPTR_OFFSET, CLOS_LAYOUT, CLOS_PROTO_OFFSET,
    CLOS_SIZE_OFFSET, CLOS_TBL_OFFSET, FieldKind, HASHTBL_LAYOUT, HASHTBL_SIZE_OFFSET,
    HASHTBL_TBL_KEY_OFFSET, HASHTBL_TBL_OFFSET, HASHTBL_TBL_STRIDE, HASHTBL_TBL_VAL_OFFSET,
    MEMBLOCK_LAYOUT, MEMBLOCK_PTR_OFFSET, MEMBLOCK_SIZE_OFFSET, OBJ_LAYOUT,
    OBJ_NUMPROPS_OFFSET, OBJ_PROTO_OFFSET, OBJ_TBL_OFFSET, ObjectLayout, STR_DATA_OFFSET,
    STR_DATA_STRIDE, STR_HASH_OFFSET, STR_LAYOUT, STR_SIZE_OFFSET, STRTBL_LAYOUT,
    STRTBL_NUMSTRS_OFFSET, STRTBL_SIZE_OFFSET, STRTBL_TBL_OFFSET, STRTBL_TBL_STRIDE,
};

use crate::boxing::Boxed;
use crate::fatal::{Fatal, RtResult};

pub trait ObjectKind {
    const LAYOUT: &'static ObjectLayout;
}

macro_rules! object_kinds {
    ($($kind:ident => $layout:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq)]
            pub struct $kind;

            impl ObjectKind for $kind {
                const LAYOUT: &'static ObjectLayout = &$layout;
            }
        )*
    };
}

object_kinds! {
    HashTbl => HASHTBL_LAYOUT,
    Obj => OBJ_LAYOUT,
    ArrTbl => ARRTBL_LAYOUT,
    Arr => ARR_LAYOUT,
    Str => STR_LAYOUT,
    StrTbl => STRTBL_LAYOUT,
    Clos => CLOS_LAYOUT,
    Cell => CELL_LAYOUT,
    MemBlock => MEMBLOCK_LAYOUT,
}

/// Byte size of a `K` object holding `count` tail elements.
pub const fn comp_size<K: ObjectKind>(count: usize) -> usize {
    K::LAYOUT.size_for(count)
}

pub struct ObjRef<K> {
    boxed: Boxed,
    // Raw memory handle: neither Send nor Sync.
    _kind: PhantomData<(K, *mut u8)>,
}

impl<K> Clone for ObjRef<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for ObjRef<K> {}

impl<K> PartialEq for ObjRef<K> {
    fn eq(&self, other: &Self) -> bool {
        self.boxed == other.boxed
    }
}

impl<K> Eq for ObjRef<K> {}

impl<K: ObjectKind> fmt::Debug for ObjRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef<{}>({:?})", K::LAYOUT.name, self.boxed)
    }
}

impl<K: ObjectKind> ObjRef<K> {
    /// Wraps `boxed` after checking that it is non-null and carries `K`'s tag.
    ///
    /// # Safety
    ///
    /// `boxed` must reference a live object of kind `K` that stays valid for
    /// every use of the returned handle.
    pub unsafe fn from_boxed(boxed: Boxed) -> RtResult<Self> {
        let layout = K::LAYOUT;
        if boxed.unbox() == 0 {
            return Err(Fatal::shape(
                "objectRef",
                format!("null {} reference", layout.name),
            ));
        }
        if boxed.tag() != layout.tag {
            return Err(Fatal::shape(
                "objectRef",
                format!(
                    "invalid {} reference: tag {} (expected {})",
                    layout.name,
                    boxed.tag(),
                    layout.tag
                ),
            ));
        }
        Ok(unsafe { Self::from_boxed_unchecked(boxed) })
    }

    /// # Safety
    ///
    /// Same as [`ObjRef::from_boxed`], and the tag must already be known to be
    /// right.
    pub unsafe fn from_boxed_unchecked(boxed: Boxed) -> Self {
        Self {
            boxed,
            _kind: PhantomData,
        }
    }

    pub fn boxed(self) -> Boxed {
        self.boxed
    }

    pub fn layout(self) -> &'static ObjectLayout {
        K::LAYOUT
    }

    pub fn base(self) -> *mut u8 {
        self.boxed.as_ptr()
    }

    #[inline]
    fn read<T: Copy>(self, offset: usize) -> T {
        unsafe { self.base().add(offset).cast::<T>().read() }
    }

    #[inline]
    fn write<T>(self, offset: usize, value: T) {
        unsafe { self.base().add(offset).cast::<T>().write(value) }
    }

    /// Element count stored in the count field, or 0 for fixed-size kinds.
    pub fn tail_count(self) -> usize {
        match K::LAYOUT.count_field() {
            Some(field) => self.read::<usize>(field.offset),
            None => 0,
        }
    }

    pub fn size_of(self) -> usize {
        K::LAYOUT.size_for(self.tail_count())
    }

    /// Every boxed reference held by the object, with its byte offset.
    pub fn visit(self) -> BoxedRefs {
        BoxedRefs::new(self.base(), K::LAYOUT, self.tail_count())
    }
}

impl ObjRef<HashTbl> {
    pub fn get_size(self) -> usize {
        self.read(HASHTBL_SIZE_OFFSET)
    }

    pub fn set_size(self, value: usize) {
        self.write(HASHTBL_SIZE_OFFSET, value)
    }

    fn entry_offset(index: usize) -> usize {
        HASHTBL_TBL_OFFSET + HASHTBL_TBL_STRIDE * index
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn get_tbl_key(self, index: usize) -> Boxed {
        self.read(Self::entry_offset(index) + HASHTBL_TBL_KEY_OFFSET)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn set_tbl_key(self, index: usize, value: Boxed) {
        self.write(Self::entry_offset(index) + HASHTBL_TBL_KEY_OFFSET, value)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn get_tbl_val(self, index: usize) -> Boxed {
        self.read(Self::entry_offset(index) + HASHTBL_TBL_VAL_OFFSET)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn set_tbl_val(self, index: usize, value: Boxed) {
        self.write(Self::entry_offset(index) + HASHTBL_TBL_VAL_OFFSET, value)
    }
}

impl ObjRef<Obj> {
    pub fn get_proto(self) -> Boxed {
        self.read(OBJ_PROTO_OFFSET)
    }

    pub fn set_proto(self, value: Boxed) {
        self.write(OBJ_PROTO_OFFSET, value)
    }

    pub fn get_tbl(self) -> Boxed {
        self.read(OBJ_TBL_OFFSET)
    }

    pub fn set_tbl(self, value: Boxed) {
        self.write(OBJ_TBL_OFFSET, value)
    }

    pub fn get_numprops(self) -> usize {
        self.read(OBJ_NUMPROPS_OFFSET)
    }

    pub fn set_numprops(self, value: usize) {
        self.write(OBJ_NUMPROPS_OFFSET, value)
    }
}

impl ObjRef<ArrTbl> {
    pub fn get_size(self) -> usize {
        self.read(ARRTBL_SIZE_OFFSET)
    }

    pub fn set_size(self, value: usize) {
        self.write(ARRTBL_SIZE_OFFSET, value)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn get_tbl(self, index: usize) -> Boxed {
        self.read(ARRTBL_TBL_OFFSET + ARRTBL_TBL_STRIDE * index)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn set_tbl(self, index: usize, value: Boxed) {
        self.write(ARRTBL_TBL_OFFSET + ARRTBL_TBL_STRIDE * index, value)
    }
}

impl ObjRef<Arr> {
    pub fn get_proto(self) -> Boxed {
        self.read(ARR_PROTO_OFFSET)
    }

    pub fn set_proto(self, value: Boxed) {
        self.write(ARR_PROTO_OFFSET, value)
    }

    pub fn get_tbl(self) -> Boxed {
        self.read(ARR_TBL_OFFSET)
    }

    pub fn set_tbl(self, value: Boxed) {
        self.write(ARR_TBL_OFFSET, value)
    }

    /// Backing `arrtbl` holding the elements.
    pub fn get_arr(self) -> Boxed {
        self.read(ARR_ARR_OFFSET)
    }

    pub fn set_arr(self, value: Boxed) {
        self.write(ARR_ARR_OFFSET, value)
    }

    pub fn get_len(self) -> usize {
        self.read(ARR_LEN_OFFSET)
    }

    pub fn set_len(self, value: usize) {
        self.write(ARR_LEN_OFFSET, value)
    }
}

impl ObjRef<Str> {
    pub fn get_hash(self) -> usize {
        self.read(STR_HASH_OFFSET)
    }

    pub fn set_hash(self, value: usize) {
        self.write(STR_HASH_OFFSET, value)
    }

    pub fn get_size(self) -> usize {
        self.read(STR_SIZE_OFFSET)
    }

    pub fn set_size(self, value: usize) {
        self.write(STR_SIZE_OFFSET, value)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn get_data(self, index: usize) -> u16 {
        self.read(STR_DATA_OFFSET + STR_DATA_STRIDE * index)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn set_data(self, index: usize, value: u16) {
        self.write(STR_DATA_OFFSET + STR_DATA_STRIDE * index, value)
    }
}

impl ObjRef<StrTbl> {
    pub fn get_numstrs(self) -> usize {
        self.read(STRTBL_NUMSTRS_OFFSET)
    }

    pub fn set_numstrs(self, value: usize) {
        self.write(STRTBL_NUMSTRS_OFFSET, value)
    }

    pub fn get_size(self) -> usize {
        self.read(STRTBL_SIZE_OFFSET)
    }

    pub fn set_size(self, value: usize) {
        self.write(STRTBL_SIZE_OFFSET, value)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn get_tbl(self, index: usize) -> Boxed {
        self.read(STRTBL_TBL_OFFSET + STRTBL_TBL_STRIDE * index)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn set_tbl(self, index: usize, value: Boxed) {
        self.write(STRTBL_TBL_OFFSET + STRTBL_TBL_STRIDE * index, value)
    }
}

impl ObjRef<Clos> {
    pub fn get_proto(self) -> Boxed {
        self.read(CLOS_PROTO_OFFSET)
    }

    pub fn set_proto(self, value: Boxed) {
        self.write(CLOS_PROTO_OFFSET, value)
    }

    pub fn get_tbl(self) -> Boxed {
        self.read(CLOS_TBL_OFFSET)
    }

    pub fn set_tbl(self, value: Boxed) {
        self.write(CLOS_TBL_OFFSET, value)
    }

    pub fn get_funcptr(self) -> *mut u8 {
        self.read(CLOS_FUNCPTR_OFFSET)
    }

    pub fn set_funcptr(self, value: *mut u8) {
        self.write(CLOS_FUNCPTR_OFFSET, value)
    }

    /// Number of captured cells.
    pub fn get_size(self) -> usize {
        self.read(CLOS_SIZE_OFFSET)
    }

    pub fn set_size(self, value: usize) {
        self.write(CLOS_SIZE_OFFSET, value)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn get_cells(self, index: usize) -> Boxed {
        self.read(CLOS_CELLS_OFFSET + CLOS_CELLS_STRIDE * index)
    }

    /// # Safety
    ///
    /// `index` must be below the stored size.
    pub unsafe fn set_cells(self, index: usize, value: Boxed) {
        self.write(CLOS_CELLS_OFFSET + CLOS_CELLS_STRIDE * index, value)
    }
}

impl ObjRef<Cell> {
    pub fn get_val(self) -> Boxed {
        self.read(CELL_VAL_OFFSET)
    }

    pub fn set_val(self, value: Boxed) {
        self.write(CELL_VAL_OFFSET, value)
    }
}

impl ObjRef<MemBlock> {
    pub fn get_ptr(self) -> *mut u8 {
        self.read(MEMBLOCK_PTR_OFFSET)
    }

    pub fn set_ptr(self, value: *mut u8) {
        self.write(MEMBLOCK_PTR_OFFSET, value)
    }

    pub fn get_size(self) -> usize {
        self.read(MEMBLOCK_SIZE_OFFSET)
    }

    pub fn set_size(self, value: usize) {
        self.write(MEMBLOCK_SIZE_OFFSET, value)
    }
}

/// Lazy walk over the boxed fields and boxed tail elements of one object.
pub struct BoxedRefs {
    base: *const u8,
    layout: &'static ObjectLayout,
    count: usize,
    field: usize,
    element: usize,
    sub_field: usize,
}

impl BoxedRefs {
    fn new(base: *const u8, layout: &'static ObjectLayout, count: usize) -> Self {
        Self {
            base,
            layout,
            count,
            field: 0,
            element: 0,
            sub_field: 0,
        }
    }

    fn load(&self, offset: usize) -> (usize, Boxed) {
        let value = unsafe { self.base.add(offset).cast::<Boxed>().read() };
        (offset, value)
    }
}

impl Iterator for BoxedRefs {
    type Item = (usize, Boxed);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(field) = self.layout.fields.get(self.field) {
            self.field += 1;
            if field.kind == FieldKind::Boxed {
                return Some(self.load(field.offset));
            }
        }

        let tail = self.layout.tail.as_ref()?;
        while self.element < self.count {
            while let Some(sub) = tail.elements.get(self.sub_field) {
                self.sub_field += 1;
                if sub.kind == FieldKind::Boxed {
                    let offset = tail.offset + tail.stride * self.element + sub.offset;
                    return Some(self.load(offset));
                }
            }
            self.sub_field = 0;
            self.element += 1;
        }
        None
    }
}

/// A checked reference to any object of the closed set of kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapRef {
    HashTbl(ObjRef<HashTbl>),
    Obj(ObjRef<Obj>),
    ArrTbl(ObjRef<ArrTbl>),
    Arr(ObjRef<Arr>),
    Str(ObjRef<Str>),
    StrTbl(ObjRef<StrTbl>),
    Clos(ObjRef<Clos>),
    Cell(ObjRef<Cell>),
    MemBlock(ObjRef<MemBlock>),
}

impl HeapRef {
    /// Several kinds share `TAG_OTHER`, so the kind must come from the caller.
    ///
    /// # Safety
    ///
    /// `boxed` must reference a live object of the named kind.
    pub unsafe fn from_kind_name(kind: &str, boxed: Boxed) -> RtResult<Self> {
        let heap_ref = unsafe {
            match kind {
                "hashtbl" => HeapRef::HashTbl(ObjRef::from_boxed(boxed)?),
                "obj" => HeapRef::Obj(ObjRef::from_boxed(boxed)?),
                "arrtbl" => HeapRef::ArrTbl(ObjRef::from_boxed(boxed)?),
                "arr" => HeapRef::Arr(ObjRef::from_boxed(boxed)?),
                "str" => HeapRef::Str(ObjRef::from_boxed(boxed)?),
                "strtbl" => HeapRef::StrTbl(ObjRef::from_boxed(boxed)?),
                "clos" => HeapRef::Clos(ObjRef::from_boxed(boxed)?),
                "cell" => HeapRef::Cell(ObjRef::from_boxed(boxed)?),
                "memblock" => HeapRef::MemBlock(ObjRef::from_boxed(boxed)?),
                other => {
                    return Err(Fatal::unsupported(
                        "objectRef",
                        format!("unknown object kind \"{other}\""),
                    ));
                }
            }
        };
        Ok(heap_ref)
    }

    pub fn layout(self) -> &'static ObjectLayout {
        match self {
            HeapRef::HashTbl(obj) => obj.layout(),
            HeapRef::Obj(obj) => obj.layout(),
            HeapRef::ArrTbl(obj) => obj.layout(),
            HeapRef::Arr(obj) => obj.layout(),
            HeapRef::Str(obj) => obj.layout(),
            HeapRef::StrTbl(obj) => obj.layout(),
            HeapRef::Clos(obj) => obj.layout(),
            HeapRef::Cell(obj) => obj.layout(),
            HeapRef::MemBlock(obj) => obj.layout(),
        }
    }

    pub fn kind_name(self) -> &'static str {
        self.layout().name
    }

    pub fn boxed(self) -> Boxed {
        match self {
            HeapRef::HashTbl(obj) => obj.boxed(),
            HeapRef::Obj(obj) => obj.boxed(),
            HeapRef::ArrTbl(obj) => obj.boxed(),
            HeapRef::Arr(obj) => obj.boxed(),
            HeapRef::Str(obj) => obj.boxed(),
            HeapRef::StrTbl(obj) => obj.boxed(),
            HeapRef::Clos(obj) => obj.boxed(),
            HeapRef::Cell(obj) => obj.boxed(),
            HeapRef::MemBlock(obj) => obj.boxed(),
        }
    }

    pub fn size_of(self) -> usize {
        match self {
            HeapRef::HashTbl(obj) => obj.size_of(),
            HeapRef::Obj(obj) => obj.size_of(),
            HeapRef::ArrTbl(obj) => obj.size_of(),
            HeapRef::Arr(obj) => obj.size_of(),
            HeapRef::Str(obj) => obj.size_of(),
            HeapRef::StrTbl(obj) => obj.size_of(),
            HeapRef::Clos(obj) => obj.size_of(),
            HeapRef::Cell(obj) => obj.size_of(),
            HeapRef::MemBlock(obj) => obj.size_of(),
        }
    }

    pub fn visit(self) -> BoxedRefs {
        match self {
            HeapRef::HashTbl(obj) => obj.visit(),
            HeapRef::Obj(obj) => obj.visit(),
            HeapRef::ArrTbl(obj) => obj.visit(),
            HeapRef::Arr(obj) => obj.visit(),
            HeapRef::Str(obj) => obj.visit(),
            HeapRef::StrTbl(obj) => obj.visit(),
            HeapRef::Clos(obj) => obj.visit(),
            HeapRef::Cell(obj) => obj.visit(),
            HeapRef::MemBlock(obj) => obj.visit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_abi::{TAG_OBJECT, TAG_OTHER, WORD_SIZE};

    fn words(count: usize) -> Vec<u64> {
        vec![0; count]
    }

    #[test]
    fn construction_checks_tag_and_null() {
        let mut storage = words(4);
        let base = storage.as_mut_ptr() as usize;

        assert!(unsafe { ObjRef::<Obj>::from_boxed(Boxed::new(base, TAG_OBJECT)) }.is_ok());
        assert!(unsafe { ObjRef::<Obj>::from_boxed(Boxed::new(base, TAG_OTHER)) }.is_err());
        assert!(unsafe { ObjRef::<Obj>::from_boxed(Boxed::new(0, TAG_OBJECT)) }.is_err());
    }

    #[test]
    fn visit_skips_scalars_and_walks_tail() {
        let mut storage = words(2 + 2 * 2);
        let base = storage.as_mut_ptr() as usize;
        let table = unsafe { ObjRef::<HashTbl>::from_boxed(Boxed::new(base, TAG_OTHER)) }
            .expect("hash table reference");
        table.set_size(2);
        unsafe {
            table.set_tbl_key(0, Boxed::from_raw(0x11));
            table.set_tbl_val(0, Boxed::from_raw(0x21));
            table.set_tbl_key(1, Boxed::from_raw(0x31));
            table.set_tbl_val(1, Boxed::from_raw(0x41));
        }

        let refs: Vec<(usize, Boxed)> = table.visit().collect();
        assert_eq!(
            refs,
            vec![
                (2 * WORD_SIZE, Boxed::from_raw(0x11)),
                (3 * WORD_SIZE, Boxed::from_raw(0x21)),
                (4 * WORD_SIZE, Boxed::from_raw(0x31)),
                (5 * WORD_SIZE, Boxed::from_raw(0x41)),
            ]
        );
    }

    #[test]
    fn string_tail_holds_no_references() {
        let mut storage = words(8);
        let base = storage.as_mut_ptr() as usize;
        let text = unsafe { ObjRef::<Str>::from_boxed(Boxed::new(base, rt_abi::TAG_STRING)) }
            .expect("string reference");
        text.set_size(4);
        assert_eq!(text.visit().count(), 0);
        assert_eq!(text.size_of(), 3 * WORD_SIZE + 8);
    }
}
