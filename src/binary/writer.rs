//! Binary tree writers: whole collections at once, or streamed one tree at a time.

use super::primitives::{
    CountingWriter, ShortIntWriter, write_f64, write_i64, write_int, write_string,
};
use super::{
    AttributeKind, AttributeTable, END_MAGIC, GLOBAL_ATTRIBUTES, GLOBAL_NAMES, LITERAL_NAME,
    MAGIC, NameTable,
};
use crate::attributes::AttributeRef;
use crate::error::BinaryError;
use crate::tree::Tree;
use std::borrow::Borrow;
use std::io::Write;
use tracing::debug;

/// Which tables go in the header and which are repeated in every tree.
#[derive(Debug, Default)]
struct TablePlan {
    names: NameTable,
    attributes: AttributeTable,
    names_per_tree: bool,
    attributes_per_tree: bool,
}

impl TablePlan {
    /// Scans the trees in order. A table stays global until some tree, arriving
    /// after the table is non-empty, would add more than half of its own entries
    /// as new ones.
    fn for_trees<T: Borrow<Tree>>(trees: &[T]) -> Self {
        let mut plan = TablePlan::default();
        for tree in trees {
            let tree = tree.borrow();

            let known_attributes = plan.attributes.len();
            let own = AttributeTable::of_tree(tree);
            let added = own
                .entries()
                .iter()
                .filter(|spec| plan.attributes.insert(&spec.name, spec.kind))
                .count();
            if known_attributes != 0 && added * 2 > own.len() {
                plan.attributes_per_tree = true;
            }

            let known_names = plan.names.len();
            let mut named = 0;
            let mut added = 0;
            for node in tree.preorder(tree.root()) {
                let name = tree[node].name();
                if !name.is_empty() {
                    named += 1;
                    if plan.names.insert(name) {
                        added += 1;
                    }
                }
            }
            if known_names != 0 && added * 2 > named {
                plan.names_per_tree = true;
            }

            if plan.names_per_tree && plan.attributes_per_tree {
                break;
            }
        }
        plan
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if !self.names_per_tree {
            flags |= GLOBAL_NAMES;
        }
        if !self.attributes_per_tree {
            flags |= GLOBAL_ATTRIBUTES;
        }
        flags
    }
}

/// Writes `trees` as one binary stream, followed by `additional_data` and the trailer.
///
/// Name and attribute tables are hoisted into the header when the trees share them.
/// Tree addresses are counted from the first byte written to `out`. Returns `out`.
///
/// ```
/// # use treenode::binary::{read_all_trees, write_trees};
/// # use treenode::nwka::parse_tree;
/// # use std::io::Cursor;
/// let trees = vec![parse_tree("((A:1,B:2):0.5,C:3);").unwrap()];
/// let bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
/// assert_eq!(&bytes[..4], b"#TRE");
/// assert_eq!(read_all_trees(&mut Cursor::new(bytes)).unwrap(), trees);
/// ```
pub fn write_trees<W: Write, T: Borrow<Tree>>(
    out: W,
    trees: &[T],
    additional_data: &[u8],
) -> Result<W, BinaryError> {
    let plan = TablePlan::for_trees(trees);
    let mut out = CountingWriter::new(out);

    out.write_all(&MAGIC)?;
    out.write_all(&[plan.flags()])?;
    if !plan.names_per_tree {
        write_int(&mut out, plan.names.len())?;
        for name in plan.names.names() {
            write_string(&mut out, name)?;
        }
    }
    if !plan.attributes_per_tree {
        write_attribute_table(&mut out, &plan.attributes)?;
    }

    let names = (!plan.names_per_tree).then_some(&plan.names);
    let attributes = (!plan.attributes_per_tree).then_some(&plan.attributes);
    let mut addresses = Vec::with_capacity(trees.len());
    for tree in trees {
        addresses.push(out.position());
        write_tree_unit(&mut out, tree.borrow(), names, attributes)?;
    }

    out.write_all(additional_data)?;
    write_trailer(&mut out, &addresses)?;
    debug!(
        trees = addresses.len(),
        global_names = !plan.names_per_tree,
        global_attributes = !plan.attributes_per_tree,
        bytes = out.position(),
        "wrote binary trees"
    );
    out.flush()?;
    Ok(out.into_inner())
}

/// Appends trees to a binary stream as they arrive.
///
/// Every tree carries its own attribute table and literal names, so nothing has to
/// be known up front. The trailer is written by [`BinaryStreamWriter::finish`].
///
/// ```
/// # use treenode::binary::{BinaryStreamWriter, read_all_trees};
/// # use treenode::nwka::parse_tree;
/// # use std::io::Cursor;
/// let mut writer = BinaryStreamWriter::begin(Vec::new()).unwrap();
/// writer.push_tree(&parse_tree("(A,B);").unwrap()).unwrap();
/// writer.push_tree(&parse_tree("(C,(D,E));").unwrap()).unwrap();
/// let bytes = writer.finish(&[]).unwrap();
/// assert_eq!(read_all_trees(&mut Cursor::new(bytes)).unwrap().len(), 2);
/// ```
#[derive(Debug)]
pub struct BinaryStreamWriter<W: Write> {
    out: CountingWriter<W>,
    addresses: Vec<u64>,
}

impl<W: Write> BinaryStreamWriter<W> {
    /// Writes the header.
    pub fn begin(out: W) -> Result<Self, BinaryError> {
        let mut out = CountingWriter::new(out);
        out.write_all(&MAGIC)?;
        out.write_all(&[0])?;
        Ok(BinaryStreamWriter { out, addresses: Vec::new() })
    }

    pub fn push_tree(&mut self, tree: &Tree) -> Result<(), BinaryError> {
        self.addresses.push(self.out.position());
        write_tree_unit(&mut self.out, tree, None, None)
    }

    /// Trees written so far.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Writes `additional_data` and the trailer, then returns the sink.
    pub fn finish(mut self, additional_data: &[u8]) -> Result<W, BinaryError> {
        self.out.write_all(additional_data)?;
        write_trailer(&mut self.out, &self.addresses)?;
        self.out.flush()?;
        debug!(trees = self.addresses.len(), bytes = self.out.position(), "finished binary stream");
        Ok(self.out.into_inner())
    }
}

fn write_attribute_table<W: Write>(out: &mut W, table: &AttributeTable) -> Result<(), BinaryError> {
    write_int(out, table.len())?;
    for spec in table.entries() {
        write_string(out, &spec.name)?;
        write_int(out, spec.kind.code())?;
    }
    Ok(())
}

fn write_trailer<W: Write>(out: &mut CountingWriter<W>, addresses: &[u64]) -> Result<(), BinaryError> {
    let trailer = out.position();
    write_int(out, addresses.len())?;
    for &address in addresses {
        write_i64(out, address)?;
    }
    write_i64(out, trailer)?;
    out.write_all(&END_MAGIC)?;
    Ok(())
}

/// One tree: attribute table (or `0` for the global one), topology, node attributes.
///
/// Missing values (`NaN` numbers, empty strings) are not written.
fn write_tree_unit<W: Write>(
    out: &mut W,
    tree: &Tree,
    names: Option<&NameTable>,
    attributes: Option<&AttributeTable>,
) -> Result<(), BinaryError> {
    let local;
    let table = match attributes {
        Some(global) => {
            write_int(out, 0)?;
            global
        }
        None => {
            local = AttributeTable::of_tree(tree);
            write_attribute_table(out, &local)?;
            &local
        }
    };

    let mut topology = ShortIntWriter::new();
    for node in tree.preorder(tree.root()) {
        topology.write(out, tree[node].children().len())?;
    }
    topology.finish(out)?;

    let mut present = Vec::new();
    for node in tree.preorder(tree.root()) {
        present.clear();
        // the table was built from these very attributes, so every lookup hits
        present.extend(
            tree[node]
                .attributes
                .iter()
                .filter(|(_, value)| !value.is_unset())
                .filter_map(|(key, value)| {
                    table.position(key, AttributeKind::of(&value)).map(|i| (i, value))
                }),
        );
        write_int(out, present.len())?;
        for &(index, value) in &present {
            write_int(out, index)?;
            match value {
                AttributeRef::Number(n) => write_f64(out, n)?,
                AttributeRef::Text(text) => match names {
                    Some(names) if table.entries()[index].is_name() => {
                        write_name(out, text, names)?
                    }
                    _ => write_string(out, text)?,
                },
            }
        }
    }
    Ok(())
}

/// Back-reference into the global name table, shifted by one (`0` is the empty name).
fn write_name<W: Write>(out: &mut W, name: &str, names: &NameTable) -> Result<(), BinaryError> {
    match names.position(name) {
        Some(index) => write_int(out, index + 1),
        None => {
            out.write_all(&[LITERAL_NAME])?;
            write_string(out, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwka::parse_tree;

    #[test]
    fn single_leaf_tree_bytes() {
        let tree = parse_tree("A;").unwrap();
        let bytes = write_trees(Vec::new(), &[tree], &[]).unwrap();
        let parts: [&[u8]; 9] = [
            b"#TRE",
            &[0b11],
            // global names: ["A"]
            &[1, 1, b'A'],
            // global attributes: Name text, Length number, Support number
            &[3, 4, b'N', b'a', b'm', b'e', 1],
            &[6, b'L', b'e', b'n', b'g', b't', b'h', 2],
            &[7, b'S', b'u', b'p', b'p', b'o', b'r', b't', 2],
            // tree at 32: global table, one leaf, Name = names[0]
            &[0, 0b00, 1, 0, 1],
            // trailer at 37
            &[1, 32, 0, 0, 0, 0, 0, 0, 0, 37, 0, 0, 0, 0, 0, 0, 0],
            &END_MAGIC,
        ];
        assert_eq!(bytes, parts.concat());
    }

    #[test]
    fn shared_tables_are_hoisted() {
        let trees = [
            parse_tree("((A:1,B:1):1,C:2);").unwrap(),
            parse_tree("((A:1,C:1):1,B:2);").unwrap(),
            parse_tree("((B:1,C:1):1,A:2);").unwrap(),
        ];
        let plan = TablePlan::for_trees(&trees);
        assert_eq!(plan.flags(), GLOBAL_NAMES | GLOBAL_ATTRIBUTES);
        assert_eq!(plan.names.names(), &["A", "B", "C"]);
        assert_eq!(plan.attributes.len(), 3);
    }

    #[test]
    fn disjoint_names_go_per_tree() {
        let trees = [
            parse_tree("(A,B,C);").unwrap(),
            parse_tree("(D,E,F);").unwrap(),
        ];
        let plan = TablePlan::for_trees(&trees);
        assert!(plan.names_per_tree);
        assert!(!plan.attributes_per_tree);
        assert_eq!(plan.flags(), GLOBAL_ATTRIBUTES);
    }

    #[test]
    fn diverging_attributes_go_per_tree() {
        let trees = [
            parse_tree("(A,B);").unwrap(),
            parse_tree("(A[&x=1,y=2,z=3,w=4],B);").unwrap(),
        ];
        let plan = TablePlan::for_trees(&trees);
        // four new entries out of seven
        assert!(plan.attributes_per_tree);
        assert!(!plan.names_per_tree);
        assert_eq!(plan.flags(), GLOBAL_NAMES);
    }

    #[test]
    fn stream_writer_uses_local_tables() {
        let mut writer = BinaryStreamWriter::begin(Vec::new()).unwrap();
        assert!(writer.is_empty());
        writer.push_tree(&parse_tree("A;").unwrap()).unwrap();
        assert_eq!(writer.len(), 1);
        let bytes = writer.finish(b"xy").unwrap();
        assert_eq!(&bytes[..5], b"#TRE\0");
        // local table of three entries follows the header
        assert_eq!(bytes[5], 3);
        assert!(bytes.ends_with(&END_MAGIC));
        let trailer = bytes.len() - 12;
        let label = u64::from_le_bytes(bytes[trailer..trailer + 8].try_into().unwrap()) as usize;
        assert_eq!(&bytes[label - 2..label], b"xy");
        assert_eq!(bytes[label], 1);
        assert_eq!(&bytes[label + 1..label + 9], &5u64.to_le_bytes());
    }
}
