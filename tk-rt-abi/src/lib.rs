//! Memory layout contract shared by the code generator and the runtime.
//!
//! Every offset below is a byte offset from the untagged base address of a
//! heap object. Offset 0 of each object holds a one-word header owned by the
//! allocator. Generated machine code bakes these numbers in, so changing any
//! of them means regenerating every compiled block.

pub const ABI_VERSION: u16 = 1;

pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

const W: usize = WORD_SIZE;

pub const TAG_NUM_BITS_INT: u32 = 2;
pub const TAG_NUM_BITS_REF: u32 = 3;
pub const TAG_INT_MASK: usize = 0b11;
pub const TAG_REF_MASK: usize = 0b111;

pub const TAG_INT: usize = 0;
pub const TAG_OTHER: usize = 1;
pub const TAG_STRING: usize = 2;
pub const TAG_FLOAT: usize = 3;
pub const TAG_ARRAY: usize = 5;
pub const TAG_FUNCTION: usize = 6;
pub const TAG_OBJECT: usize = 7;

/// Heap allocations are aligned so that the reference tag bits are free.
pub const HEAP_ALIGN: usize = 1 << TAG_NUM_BITS_REF;

pub const HEADER_OFFSET: usize = 0;

pub const HASHTBL_SIZE_OFFSET: usize = W;
pub const HASHTBL_TBL_OFFSET: usize = 2 * W;
pub const HASHTBL_TBL_STRIDE: usize = 2 * W;
pub const HASHTBL_TBL_KEY_OFFSET: usize = 0;
pub const HASHTBL_TBL_VAL_OFFSET: usize = W;

pub const OBJ_PROTO_OFFSET: usize = W;
pub const OBJ_TBL_OFFSET: usize = 2 * W;
pub const OBJ_NUMPROPS_OFFSET: usize = 3 * W;

pub const ARRTBL_SIZE_OFFSET: usize = W;
pub const ARRTBL_TBL_OFFSET: usize = 2 * W;
pub const ARRTBL_TBL_STRIDE: usize = W;

pub const ARR_PROTO_OFFSET: usize = W;
pub const ARR_TBL_OFFSET: usize = 2 * W;
/// Unnamed word left free by the generated `arr` layout.
pub const ARR_RESERVED_OFFSET: usize = 3 * W;
pub const ARR_ARR_OFFSET: usize = 4 * W;
pub const ARR_LEN_OFFSET: usize = 5 * W;

pub const STR_HASH_OFFSET: usize = W;
pub const STR_SIZE_OFFSET: usize = 2 * W;
pub const STR_DATA_OFFSET: usize = 3 * W;
pub const STR_DATA_STRIDE: usize = 2;

pub const STRTBL_NUMSTRS_OFFSET: usize = W;
pub const STRTBL_SIZE_OFFSET: usize = 2 * W;
pub const STRTBL_TBL_OFFSET: usize = 3 * W;
pub const STRTBL_TBL_STRIDE: usize = W;

pub const CLOS_PROTO_OFFSET: usize = W;
pub const CLOS_TBL_OFFSET: usize = 2 * W;
/// Unnamed word left free by the generated `clos` layout.
pub const CLOS_RESERVED_OFFSET: usize = 3 * W;
pub const CLOS_FUNCPTR_OFFSET: usize = 4 * W;
pub const CLOS_SIZE_OFFSET: usize = 5 * W;
pub const CLOS_CELLS_OFFSET: usize = 6 * W;
pub const CLOS_CELLS_STRIDE: usize = W;

pub const CELL_VAL_OFFSET: usize = W;

pub const MEMBLOCK_PTR_OFFSET: usize = W;
pub const MEMBLOCK_SIZE_OFFSET: usize = 2 * W;

/// Runtime context passed to every invocation of a machine code block.
pub const CTX_STACK_LIMIT_OFFSET: usize = 0;
pub const CTX_HEAP_LIMIT_OFFSET: usize = W;
pub const CTX_HANDLERS_OFFSET: usize = 2 * W;
pub const CTX_HANDLER_COUNT: usize = 3;
pub const CTX_SIZE: usize = CTX_HANDLERS_OFFSET + CTX_HANDLER_COUNT * W;

pub const HANDLER_HELLO: usize = 0;
pub const HANDLER_PRINT_WORD: usize = 1;
pub const HANDLER_ADD: usize = 2;

pub const fn ctx_handler_offset(index: usize) -> usize {
    CTX_HANDLERS_OFFSET + index * W
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Pointer-sized integer (sizes, counts, hashes).
    Word,
    /// Untagged native pointer.
    RawPtr,
    /// Tagged reference to another heap object.
    Boxed,
    /// 16-bit code unit.
    U16,
}

impl FieldKind {
    pub const fn width(self) -> usize {
        match self {
            FieldKind::Word | FieldKind::RawPtr | FieldKind::Boxed => W,
            FieldKind::U16 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TailLayout {
    pub name: &'static str,
    pub offset: usize,
    pub stride: usize,
    /// Name of the fixed field holding the element count.
    pub count_field: &'static str,
    /// Sub-fields of one element; offsets are relative to the element start.
    pub elements: &'static [FieldLayout],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectLayout {
    pub name: &'static str,
    pub tag: usize,
    pub base_size: usize,
    pub fields: &'static [FieldLayout],
    pub tail: Option<TailLayout>,
}

impl ObjectLayout {
    /// Total byte size of an object of this kind holding `count` tail
    /// elements. `count` is ignored for fixed-size kinds.
    pub const fn size_for(&self, count: usize) -> usize {
        match &self.tail {
            Some(tail) => self.base_size + tail.stride * count,
            None => self.base_size,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldLayout> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn count_field(&self) -> Option<&'static FieldLayout> {
        let tail = self.tail.as_ref()?;
        self.field(tail.count_field)
    }
}

const fn field(name: &'static str, offset: usize, kind: FieldKind) -> FieldLayout {
    FieldLayout { name, offset, kind }
}

pub const HASHTBL_LAYOUT: ObjectLayout = ObjectLayout {
    name: "hashtbl",
    tag: TAG_OTHER,
    base_size: HASHTBL_TBL_OFFSET,
    fields: &[field("size", HASHTBL_SIZE_OFFSET, FieldKind::Word)],
    tail: Some(TailLayout {
        name: "tbl",
        offset: HASHTBL_TBL_OFFSET,
        stride: HASHTBL_TBL_STRIDE,
        count_field: "size",
        elements: &[
            field("key", HASHTBL_TBL_KEY_OFFSET, FieldKind::Boxed),
            field("val", HASHTBL_TBL_VAL_OFFSET, FieldKind::Boxed),
        ],
    }),
};

pub const OBJ_LAYOUT: ObjectLayout = ObjectLayout {
    name: "obj",
    tag: TAG_OBJECT,
    base_size: 4 * W,
    fields: &[
        field("proto", OBJ_PROTO_OFFSET, FieldKind::Boxed),
        field("tbl", OBJ_TBL_OFFSET, FieldKind::Boxed),
        field("numprops", OBJ_NUMPROPS_OFFSET, FieldKind::Word),
    ],
    tail: None,
};

pub const ARRTBL_LAYOUT: ObjectLayout = ObjectLayout {
    name: "arrtbl",
    tag: TAG_OTHER,
    base_size: ARRTBL_TBL_OFFSET,
    fields: &[field("size", ARRTBL_SIZE_OFFSET, FieldKind::Word)],
    tail: Some(TailLayout {
        name: "tbl",
        offset: ARRTBL_TBL_OFFSET,
        stride: ARRTBL_TBL_STRIDE,
        count_field: "size",
        elements: &[field("tbl", 0, FieldKind::Boxed)],
    }),
};

pub const ARR_LAYOUT: ObjectLayout = ObjectLayout {
    name: "arr",
    tag: TAG_ARRAY,
    base_size: 6 * W,
    fields: &[
        field("proto", ARR_PROTO_OFFSET, FieldKind::Boxed),
        field("tbl", ARR_TBL_OFFSET, FieldKind::Boxed),
        field("reserved", ARR_RESERVED_OFFSET, FieldKind::Word),
        field("arr", ARR_ARR_OFFSET, FieldKind::Boxed),
        field("len", ARR_LEN_OFFSET, FieldKind::Word),
    ],
    tail: None,
};

pub const STR_LAYOUT: ObjectLayout = ObjectLayout {
    name: "str",
    tag: TAG_STRING,
    base_size: STR_DATA_OFFSET,
    fields: &[
        field("hash", STR_HASH_OFFSET, FieldKind::Word),
        field("size", STR_SIZE_OFFSET, FieldKind::Word),
    ],
    tail: Some(TailLayout {
        name: "data",
        offset: STR_DATA_OFFSET,
        stride: STR_DATA_STRIDE,
        count_field: "size",
        elements: &[field("data", 0, FieldKind::U16)],
    }),
};

pub const STRTBL_LAYOUT: ObjectLayout = ObjectLayout {
    name: "strtbl",
    tag: TAG_OTHER,
    base_size: STRTBL_TBL_OFFSET,
    fields: &[
        field("numstrs", STRTBL_NUMSTRS_OFFSET, FieldKind::Word),
        field("size", STRTBL_SIZE_OFFSET, FieldKind::Word),
    ],
    tail: Some(TailLayout {
        name: "tbl",
        offset: STRTBL_TBL_OFFSET,
        stride: STRTBL_TBL_STRIDE,
        count_field: "size",
        elements: &[field("tbl", 0, FieldKind::Boxed)],
    }),
};

pub const CLOS_LAYOUT: ObjectLayout = ObjectLayout {
    name: "clos",
    tag: TAG_FUNCTION,
    base_size: CLOS_CELLS_OFFSET,
    fields: &[
        field("proto", CLOS_PROTO_OFFSET, FieldKind::Boxed),
        field("tbl", CLOS_TBL_OFFSET, FieldKind::Boxed),
        field("reserved", CLOS_RESERVED_OFFSET, FieldKind::Word),
        field("funcptr", CLOS_FUNCPTR_OFFSET, FieldKind::RawPtr),
        field("size", CLOS_SIZE_OFFSET, FieldKind::Word),
    ],
    tail: Some(TailLayout {
        name: "cells",
        offset: CLOS_CELLS_OFFSET,
        stride: CLOS_CELLS_STRIDE,
        count_field: "size",
        elements: &[field("cells", 0, FieldKind::Boxed)],
    }),
};

pub const CELL_LAYOUT: ObjectLayout = ObjectLayout {
    name: "cell",
    tag: TAG_OTHER,
    base_size: 2 * W,
    fields: &[field("val", CELL_VAL_OFFSET, FieldKind::Boxed)],
    tail: None,
};

pub const MEMBLOCK_LAYOUT: ObjectLayout = ObjectLayout {
    name: "memblock",
    tag: TAG_OTHER,
    base_size: 3 * W,
    fields: &[
        field("ptr", MEMBLOCK_PTR_OFFSET, FieldKind::RawPtr),
        field("size", MEMBLOCK_SIZE_OFFSET, FieldKind::Word),
    ],
    tail: None,
};

pub const LAYOUTS: [&ObjectLayout; 9] = [
    &HASHTBL_LAYOUT,
    &OBJ_LAYOUT,
    &ARRTBL_LAYOUT,
    &ARR_LAYOUT,
    &STR_LAYOUT,
    &STRTBL_LAYOUT,
    &CLOS_LAYOUT,
    &CELL_LAYOUT,
    &MEMBLOCK_LAYOUT,
];

fn layouts_by_name() -> &'static std::collections::HashMap<&'static str, &'static ObjectLayout> {
    static LOOKUP: std::sync::OnceLock<
        std::collections::HashMap<&'static str, &'static ObjectLayout>,
    > = std::sync::OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut map = std::collections::HashMap::with_capacity(LAYOUTS.len());
        for layout in LAYOUTS {
            map.insert(layout.name, layout);
        }
        map
    })
}

pub fn layout_by_name(name: &str) -> Option<&'static ObjectLayout> {
    layouts_by_name().get(name).copied()
}
