//! Binary tree reader with random access by tree index.

use super::primitives::{
    ShortIntReader, position, read_byte, read_exact, read_f64, read_i64, read_int,
    read_int_after, read_string,
};
use super::{
    AttributeKind, AttributeSpec, END_MAGIC, GLOBAL_ATTRIBUTES, GLOBAL_NAMES, LITERAL_NAME, MAGIC,
};
use crate::attributes::{AttributeValue, Attributes};
use crate::error::BinaryError;
use crate::tree::Tree;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, warn};

/// Trailer bytes after the tree address list: trailer address + `END\xFF`.
const TRAILER_TAIL: u64 = 12;

/// Header and trailer facts of a binary stream, read once and reused for every
/// random access.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTreeMetadata {
    /// Present when the header carries the shared name table.
    pub global_names: Option<Vec<String>>,
    /// Present when the header carries the shared attribute table.
    pub global_attributes: Option<Vec<AttributeSpec>>,
    /// Start offset of every tree.
    pub tree_addresses: Vec<u64>,
    /// Offset of the trailer; `None` when it was missing or corrupt and the
    /// addresses were recovered by a sequential scan.
    pub trailer_address: Option<u64>,
    /// Offset of the first byte after the header tables.
    pub data_start: u64,
}

impl BinaryTreeMetadata {
    pub fn tree_count(&self) -> usize {
        self.tree_addresses.len()
    }

    pub fn has_global_names(&self) -> bool {
        self.global_names.is_some()
    }

    pub fn has_global_attributes(&self) -> bool {
        self.global_attributes.is_some()
    }

    /// True when the tree addresses came from a well-formed trailer.
    pub fn has_valid_trailer(&self) -> bool {
        self.trailer_address.is_some()
    }
}

/// Reads the header tables and the tree address list.
///
/// A missing or damaged trailer is not an error: the trees are then located by
/// parsing them one after the other until one fails.
///
/// # Errors
/// [`BinaryError::InvalidHeader`] or [`BinaryError::InvalidFlags`] for streams that
/// are not binary tree files, or any decoding error inside the header tables.
pub fn read_metadata<R: Read + Seek>(input: &mut R) -> Result<BinaryTreeMetadata, BinaryError> {
    input.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    read_exact(input, &mut magic)?;
    if magic != MAGIC {
        return Err(BinaryError::InvalidHeader { found: magic });
    }
    let flags = read_byte(input)?;
    if flags & !(GLOBAL_NAMES | GLOBAL_ATTRIBUTES) != 0 {
        return Err(BinaryError::InvalidFlags { flags });
    }

    let global_names = if flags & GLOBAL_NAMES != 0 {
        let count = read_int(input)?;
        let mut names = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            names.push(read_string(input)?);
        }
        Some(names)
    } else {
        None
    };
    let global_attributes = if flags & GLOBAL_ATTRIBUTES != 0 {
        Some(read_attribute_table(input)?)
    } else {
        None
    };
    let data_start = input.stream_position()?;

    let mut metadata = BinaryTreeMetadata {
        global_names,
        global_attributes,
        tree_addresses: Vec::new(),
        trailer_address: None,
        data_start,
    };

    match read_trailer(input, data_start) {
        Some((trailer, addresses)) => {
            metadata.trailer_address = Some(trailer);
            metadata.tree_addresses = addresses;
        }
        None => {
            metadata.tree_addresses = scan_trees(input, &metadata)?;
            warn!(
                trees = metadata.tree_addresses.len(),
                "binary trailer missing or corrupt, located trees by sequential scan"
            );
        }
    }
    debug!(
        trees = metadata.tree_count(),
        global_names = metadata.has_global_names(),
        global_attributes = metadata.has_global_attributes(),
        "read binary metadata"
    );
    Ok(metadata)
}

/// `(trailer address, tree addresses)`, or `None` when anything about the trailer
/// does not add up.
fn read_trailer<R: Read + Seek>(input: &mut R, data_start: u64) -> Option<(u64, Vec<u64>)> {
    let end = input.seek(SeekFrom::End(0)).ok()?;
    if end < data_start + 1 + TRAILER_TAIL {
        return None;
    }
    input.seek(SeekFrom::Start(end - 4)).ok()?;
    let mut magic = [0u8; 4];
    read_exact(input, &mut magic).ok()?;
    if magic != END_MAGIC {
        return None;
    }

    input.seek(SeekFrom::Start(end - TRAILER_TAIL)).ok()?;
    let trailer = read_i64(input).ok()?;
    if trailer < data_start || trailer >= end - TRAILER_TAIL {
        return None;
    }
    input.seek(SeekFrom::Start(trailer)).ok()?;
    let count = read_int(input).ok()?;
    let mut addresses = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let address = read_i64(input).ok()?;
        if address < data_start || address >= trailer {
            return None;
        }
        addresses.push(address);
    }
    (input.stream_position().ok()? == end - TRAILER_TAIL).then_some((trailer, addresses))
}

/// Parses trees from `data_start` onwards, keeping the start of every one that
/// decodes. Stops at the end of the stream or at the first failure.
fn scan_trees<R: Read + Seek>(
    input: &mut R,
    metadata: &BinaryTreeMetadata,
) -> Result<Vec<u64>, BinaryError> {
    let end = input.seek(SeekFrom::End(0))?;
    let mut here = input.seek(SeekFrom::Start(metadata.data_start))?;
    let mut addresses = Vec::new();
    while here < end {
        if read_tree(input, metadata).is_err() {
            break;
        }
        addresses.push(here);
        here = input.stream_position()?;
    }
    Ok(addresses)
}

fn read_attribute_table<R: Read + Seek>(input: &mut R) -> Result<Vec<AttributeSpec>, BinaryError> {
    let count = read_int(input)?;
    let mut table = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let name = read_string(input)?;
        let at = position(input);
        let code = read_int(input)?;
        let kind = AttributeKind::from_code(code)
            .ok_or(BinaryError::InvalidAttributeKind { kind: code as u32, position: at })?;
        table.push(AttributeSpec { name, kind });
    }
    Ok(table)
}

/// Decodes the tree starting at the current stream position.
///
/// On success the stream is left at the first byte after the tree.
pub fn read_tree<R: Read + Seek>(
    input: &mut R,
    metadata: &BinaryTreeMetadata,
) -> Result<Tree, BinaryError> {
    let local = read_attribute_table(input)?;
    let table: &[AttributeSpec] = match (&metadata.global_attributes, local.is_empty()) {
        (Some(global), true) => global,
        _ => &local,
    };

    // Step 1: topology, pre-order child counts
    let mut tree = Tree::new();
    let mut shorts = ShortIntReader::new();
    let mut stack = vec![(tree.root(), shorts.read(input)?)];
    while let Some(top) = stack.last_mut() {
        if top.1 == 0 {
            stack.pop();
            continue;
        }
        top.1 -= 1;
        let parent = top.0;
        let child = tree.push_child(parent, Attributes::new());
        stack.push((child, shorts.read(input)?));
    }

    // Step 2: attributes, same order
    let order: Vec<_> = tree.preorder(tree.root()).collect();
    for node in order {
        let count = read_int(input)?;
        for _ in 0..count {
            let at = position(input);
            let index = read_int(input)?;
            let spec = table.get(index).ok_or(BinaryError::InvalidAttributeIndex {
                index: index as u32,
                available: table.len(),
                position: at,
            })?;
            let value: AttributeValue = match (&metadata.global_names, spec.kind) {
                (Some(names), _) if spec.is_name() => read_name(input, names)?.into(),
                (_, AttributeKind::Number) => read_f64(input)?.into(),
                (_, AttributeKind::Text) => read_string(input)?.into(),
            };
            tree.attributes_mut(node).insert(spec.name.clone(), value);
        }
    }
    Ok(tree)
}

fn read_name<R: Read + Seek>(input: &mut R, names: &[String]) -> Result<String, BinaryError> {
    let at = position(input);
    match read_byte(input)? {
        0 => Ok(String::new()),
        LITERAL_NAME => read_string(input),
        first => {
            let index = read_int_after(input, first)?;
            let name = index.checked_sub(1).and_then(|i| names.get(i));
            name.cloned().ok_or(BinaryError::InvalidNameIndex {
                index: index as u32,
                available: names.len(),
                position: at,
            })
        }
    }
}

/// Seeks to tree `index` and decodes it.
pub fn read_tree_at<R: Read + Seek>(
    input: &mut R,
    metadata: &BinaryTreeMetadata,
    index: usize,
) -> Result<Tree, BinaryError> {
    let address = *metadata.tree_addresses.get(index).ok_or(BinaryError::TreeIndexOutOfRange {
        index,
        count: metadata.tree_count(),
    })?;
    input.seek(SeekFrom::Start(address))?;
    read_tree(input, metadata)
}

/// Reads the metadata and then every tree.
pub fn read_all_trees<R: Read + Seek>(input: &mut R) -> Result<Vec<Tree>, BinaryError> {
    let metadata = read_metadata(input)?;
    (0..metadata.tree_count()).map(|i| read_tree_at(input, &metadata, i)).collect()
}

/// The opaque bytes stored between the last tree and the trailer.
///
/// Without a valid trailer this is everything after the last tree that decoded.
pub fn read_additional_data<R: Read + Seek>(
    input: &mut R,
    metadata: &BinaryTreeMetadata,
) -> Result<Vec<u8>, BinaryError> {
    let start = match metadata.tree_count() {
        0 => metadata.data_start,
        n => {
            read_tree_at(input, metadata, n - 1)?;
            input.stream_position()?
        }
    };
    let end = match metadata.trailer_address {
        Some(trailer) => trailer,
        None => input.seek(SeekFrom::End(0))?,
    };
    if end <= start {
        return Ok(Vec::new());
    }
    input.seek(SeekFrom::Start(start))?;
    let mut data = vec![0u8; (end - start) as usize];
    read_exact(input, &mut data)?;
    Ok(data)
}

/// Lazy iterator over the trees of a binary stream.
///
/// Every item seeks to its tree's address, so interleaving other reads on the
/// same stream is harmless.
#[derive(Debug)]
pub struct BinaryTreeIter<R> {
    input: R,
    metadata: BinaryTreeMetadata,
    next: usize,
}

impl<R: Read + Seek> BinaryTreeIter<R> {
    /// Reads the metadata of `input`.
    pub fn new(mut input: R) -> Result<Self, BinaryError> {
        let metadata = read_metadata(&mut input)?;
        Ok(Self::with_metadata(input, metadata))
    }

    pub fn with_metadata(input: R, metadata: BinaryTreeMetadata) -> Self {
        BinaryTreeIter { input, metadata, next: 0 }
    }

    pub fn metadata(&self) -> &BinaryTreeMetadata {
        &self.metadata
    }

    pub fn into_inner(self) -> (R, BinaryTreeMetadata) {
        (self.input, self.metadata)
    }
}

impl<R: Read + Seek> Iterator for BinaryTreeIter<R> {
    type Item = Result<Tree, BinaryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.metadata.tree_count() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(read_tree_at(&mut self.input, &self.metadata, index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.metadata.tree_count() - self.next;
        (left, Some(left))
    }
}

impl<R: Read + Seek> ExactSizeIterator for BinaryTreeIter<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{BinaryStreamWriter, write_trees};
    use crate::nwka::{parse_tree, parse_trees};
    use std::io::Cursor;

    fn sample() -> Vec<Tree> {
        parse_trees(
            "t1 ((A:1,B:2)x:0.5[&support=0.9,rate=0.25],(C:1.5,D:0.5):1[&host='human']);\n\
             t2 ((A:1,C:2):0.5,(B:1.5,D:0.5)0.8:1);\n\
             t3 (((A,B),C),D);",
        )
        .collect::<Result<_, _>>()
        .unwrap()
    }

    #[test]
    fn attributes_survive_round_trip() {
        let trees = sample();
        let bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
        let back = read_all_trees(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, trees);
        assert_eq!(back[0].name(), Some("t1"));
        let x = back[0].node_by_name("x").unwrap();
        assert_eq!(back[0][x].support(), 0.9);
        assert_eq!(back[0].attributes(x).get_number("RATE"), Some(0.25));
        assert!(back[2][back[2].root()].length().is_nan());
    }

    #[test]
    fn random_access_by_index() {
        let trees = sample();
        let bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
        let mut input = Cursor::new(bytes);
        let metadata = read_metadata(&mut input).unwrap();
        assert_eq!(metadata.tree_count(), 3);
        assert!(metadata.has_valid_trailer());
        assert!(metadata.has_global_names());
        assert_eq!(read_tree_at(&mut input, &metadata, 2).unwrap(), trees[2]);
        assert_eq!(read_tree_at(&mut input, &metadata, 0).unwrap(), trees[0]);
        assert!(matches!(
            read_tree_at(&mut input, &metadata, 3),
            Err(BinaryError::TreeIndexOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn per_tree_tables_round_trip() {
        let trees: Vec<Tree> = parse_trees("(A,B,C);(D,E,F);(G[&x=1,y='a',z=2,w=3],H);")
            .collect::<Result<_, _>>()
            .unwrap();
        let bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
        assert_eq!(bytes[4], 0);
        let mut input = Cursor::new(bytes);
        let metadata = read_metadata(&mut input).unwrap();
        assert!(!metadata.has_global_names());
        assert!(!metadata.has_global_attributes());
        let iter = BinaryTreeIter::with_metadata(input, metadata);
        assert_eq!(iter.len(), 3);
        assert_eq!(iter.collect::<Result<Vec<_>, _>>().unwrap(), trees);
    }

    #[test]
    fn large_child_counts_escape() {
        let leaves: Vec<String> = (0..300).map(|i| format!("L{i}")).collect();
        let tree = parse_tree(&format!("({});", leaves.join(","))).unwrap();
        let bytes = write_trees(Vec::new(), &[&tree], &[]).unwrap();
        let back = read_all_trees(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back[0], tree);
        assert_eq!(back[0][back[0].root()].children().len(), 300);
    }

    #[test]
    fn additional_data_between_trees_and_trailer() {
        let trees = sample();
        let bytes = write_trees(Vec::new(), &trees, b"payload").unwrap();
        let mut input = Cursor::new(bytes);
        let metadata = read_metadata(&mut input).unwrap();
        assert_eq!(read_additional_data(&mut input, &metadata).unwrap(), b"payload");

        let empty = write_trees(Vec::new(), &trees, &[]).unwrap();
        let mut input = Cursor::new(empty);
        let metadata = read_metadata(&mut input).unwrap();
        assert!(read_additional_data(&mut input, &metadata).unwrap().is_empty());
    }

    #[test]
    fn missing_trailer_falls_back_to_scan() {
        let trees = sample();
        let mut writer = BinaryStreamWriter::begin(Vec::new()).unwrap();
        for tree in &trees {
            writer.push_tree(tree).unwrap();
        }
        let mut bytes = writer.finish(&[]).unwrap();
        // chop the trailer: 1 count byte, 3 addresses, trailer address, magic
        bytes.truncate(bytes.len() - (1 + 3 * 8 + 8 + 4));
        let mut input = Cursor::new(bytes);
        let metadata = read_metadata(&mut input).unwrap();
        assert!(!metadata.has_valid_trailer());
        assert_eq!(metadata.tree_count(), 3);
        assert_eq!(read_tree_at(&mut input, &metadata, 1).unwrap(), trees[1]);
    }

    #[test]
    fn corrupt_trailer_keeps_parseable_prefix() {
        let trees = sample();
        let mut bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
        let len = bytes.len();
        bytes[len - 1] = 0;
        let mut input = Cursor::new(bytes);
        let metadata = read_metadata(&mut input).unwrap();
        assert!(!metadata.has_valid_trailer());
        // the leftover trailer bytes do not decode as a fourth tree
        assert_eq!(metadata.tree_count(), 3);
    }

    #[test]
    fn header_errors() {
        assert!(matches!(
            read_metadata(&mut Cursor::new(b"(A,B);".to_vec())),
            Err(BinaryError::InvalidHeader { found }) if &found == b"(A,B"
        ));
        assert!(matches!(
            read_metadata(&mut Cursor::new(b"#TRE\x04".to_vec())),
            Err(BinaryError::InvalidFlags { flags: 4 })
        ));
        assert!(matches!(
            read_metadata(&mut Cursor::new(b"#TR".to_vec())),
            Err(BinaryError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn empty_collection() {
        let bytes = write_trees::<_, Tree>(Vec::new(), &[], b"x").unwrap();
        let mut input = Cursor::new(bytes);
        let metadata = read_metadata(&mut input).unwrap();
        assert_eq!(metadata.tree_count(), 0);
        assert!(metadata.has_valid_trailer());
        assert_eq!(read_additional_data(&mut input, &metadata).unwrap(), b"x");
    }
}
