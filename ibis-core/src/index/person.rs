//! Person mapping and birthday index

use std::path::Path;

use crate::error::{Error, Result};
use crate::index::{data_file, files, FileIndexes};
use crate::io::MappedFile;
use crate::model::{Birthday, PersonMapper};
use crate::tokenizer::Tokenizer;

/// Scan `person.csv` once, assigning dense ids in appearance order.
pub fn build_person_mapping(data_dir: &Path) -> Result<PersonMapper> {
    let file = MappedFile::open(data_file(data_dir, files::PERSON))?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);

    let num_persons = tokenizer.count_lines().saturating_sub(1) as usize;
    let mut mapper = PersonMapper::with_capacity(num_persons);

    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let raw = tokenizer.consume_long(b'|')?;
        mapper.insert(raw as u64);
        tokenizer.skip_after(b'\n');
    }
    log::debug!("person mapping: {} persons", mapper.count());
    Ok(mapper)
}

/// Second `person.csv` scan: packed birthdays per dense person id.
///
/// Column layout: `id|firstName|lastName|gender|birthday|...`.
pub fn build_birthday_index(data_dir: &Path, indexes: &FileIndexes) -> Result<Vec<Birthday>> {
    let mapper = indexes.person_mapper();
    let file = MappedFile::open(data_file(data_dir, files::PERSON))?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);

    let mut birthdays = vec![0 as Birthday; mapper.count() as usize];

    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let raw = tokenizer.consume_long(b'|')?;
        tokenizer.skip_after(b'|'); // firstName
        tokenizer.skip_after(b'|'); // lastName
        tokenizer.skip_after(b'|'); // gender
        let id = mapper.to_dense(raw as u64).ok_or_else(|| {
            Error::corruption(&name, format!("person {raw} missing from mapping"))
        })?;
        birthdays[id as usize] = tokenizer.consume_birthday()?;
        tokenizer.skip_after(b'\n');
    }
    Ok(birthdays)
}
