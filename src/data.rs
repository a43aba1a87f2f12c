use rkyv::{Archive, Serialize};

pub type StringId = u32;
#[allow(dead_code)]
pub type ArchivedStringId = <StringId as Archive>::Archived;

#[derive(Archive, Serialize, Debug, Clone, Copy)]
pub struct Range {
    pub start: u32,
    pub len: u32,
}

#[allow(dead_code)]
impl Range {
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }
}

#[derive(Archive, Serialize, Debug)]
pub struct TermRecord {
    pub word: StringId,
    pub definition: StringId,
}

/// One built-in dictionary; `terms` points into `BuiltinStore::terms` in file order.
#[derive(Archive, Serialize, Debug)]
pub struct SourceRecord {
    pub name: StringId,
    pub terms: Range,
}

#[derive(Archive, Serialize, Debug)]
pub struct PackedStrings {
    pub offsets: Vec<u32>,
    pub lengths: Vec<u32>,
    pub data: Vec<u8>,
}

#[derive(Archive, Serialize, Debug)]
pub struct BuiltinStore {
    pub strings: PackedStrings,
    pub sources: Vec<SourceRecord>,
    pub terms: Vec<TermRecord>,
}
