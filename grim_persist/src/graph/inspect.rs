use std::collections::BTreeMap;

use serde::Serialize;

use crate::cursor::ByteReader;
use crate::error::GraphError;
use crate::processed::ProcessedObject;
use crate::user_types::DEFAULT_USER_TYPE;

use super::{Section, NO_ROOT_TABLE};

/// Shape of a saved graph, read without a runtime to load it into.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphSummary {
    pub bytes: usize,
    pub strings: usize,
    pub class_names: Vec<String>,
    pub closure_names: Vec<String>,
    pub arrays: usize,
    pub tables: usize,
    pub root_table: Option<u32>,
    pub instances: usize,
    /// Instance counts keyed by user-type tag, with 0 for generic instances.
    pub instances_by_user_type: BTreeMap<u32, usize>,
    pub references: usize,
    pub weak_references: usize,
}

impl GraphSummary {
    pub fn scan(bytes: &[u8]) -> Result<Self, GraphError> {
        let mut reader = ByteReader::new(bytes);
        let mut summary = GraphSummary {
            bytes: bytes.len(),
            ..GraphSummary::default()
        };

        Section::Strings.expect(&mut reader)?;
        summary.strings = reader.get_len()?;
        reader.ensure_items(summary.strings, 4)?;
        for _ in 0..summary.strings {
            reader.get_str()?;
        }

        summary.class_names = read_names(&mut reader, Section::ClassRefs)?;
        summary.closure_names = read_names(&mut reader, Section::ClosureRefs)?;

        Section::Arrays.expect(&mut reader)?;
        summary.arrays = reader.get_len()?;
        reader.ensure_items(summary.arrays, 4)?;
        for _ in 0..summary.arrays {
            let len = reader.get_len()?;
            reader.ensure_items(len, 1)?;
            for _ in 0..len {
                summary.count(ProcessedObject::read(&mut reader)?);
            }
        }

        Section::Tables.expect(&mut reader)?;
        let root = reader.get_i32()?;
        summary.tables = reader.get_len()?;
        summary.root_table = match root {
            NO_ROOT_TABLE => None,
            index => match u32::try_from(index) {
                Ok(position) if (position as usize) < summary.tables => Some(position),
                _ => {
                    return Err(GraphError::BadRootIndex {
                        index,
                        count: summary.tables,
                    })
                }
            },
        };
        reader.ensure_items(summary.tables, 4)?;
        for _ in 0..summary.tables {
            summary.skip_members(&mut reader)?;
        }

        Section::Instances.expect(&mut reader)?;
        summary.instances = reader.get_len()?;
        reader.ensure_items(summary.instances, 4)?;
        for _ in 0..summary.instances {
            let user_type = reader.get_u32()?;
            *summary.instances_by_user_type.entry(user_type).or_default() += 1;
            if user_type == DEFAULT_USER_TYPE {
                reader.get_u32()?;
                summary.skip_members(&mut reader)?;
            } else {
                let len = reader.get_len()?;
                reader.get_bytes(len)?;
            }
        }

        if !reader.is_empty() {
            return Err(GraphError::TrailingBytes(reader.remaining()));
        }
        Ok(summary)
    }

    fn skip_members(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        let count = reader.get_len()?;
        reader.ensure_items(count, 2)?;
        for _ in 0..count {
            self.count(ProcessedObject::read(reader)?);
            self.count(ProcessedObject::read(reader)?);
        }
        Ok(())
    }

    fn count(&mut self, processed: ProcessedObject) {
        if let ProcessedObject::Ref(reference) = processed {
            self.references += 1;
            if reference.is_weak {
                self.weak_references += 1;
            }
        }
    }
}

fn read_names(reader: &mut ByteReader<'_>, section: Section) -> Result<Vec<String>, GraphError> {
    section.expect(reader)?;
    let count = reader.get_len()?;
    reader.ensure_items(count, 4)?;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(reader.get_str()?.to_string());
    }
    Ok(names)
}
