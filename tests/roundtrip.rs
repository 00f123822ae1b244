use std::io::Cursor;
use treenode::binary::{
    BinaryStreamWriter, BinaryTreeIter, read_additional_data, read_all_trees, read_metadata, write_trees,
};
use treenode::collection::TreeCollection;
use treenode::nwka::{WriteOptions, parse_trees, write_tree};
use treenode::tree::Tree;

const SAMPLE: &str = "\
t1 ((A:1,B:2)x:0.5[&support=0.9,rate=0.25],'C d':3);
t2 ((A:1,'C d':2):0.5[&rate=1.5,clade='left'],B:3);
((B:0.1,(A:0.2,'C d':0.3)0.75:0.4):0,D:1[&height=12]);
";

fn sample() -> Vec<Tree> {
    parse_trees(SAMPLE).collect::<Result<_, _>>().unwrap()
}

fn as_text(trees: &[Tree]) -> Vec<String> {
    trees.iter().map(|t| write_tree(t, &WriteOptions::nwka())).collect()
}

#[test]
fn nwka_through_binary_keeps_text() {
    let trees = sample();
    assert_eq!(trees.len(), 3);
    let bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
    let back = read_all_trees(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(back, trees);
    assert_eq!(as_text(&back), as_text(&trees));
    assert_eq!(back[0].name(), Some("t1"));
    assert_eq!(back[2].name(), None);
}

#[test]
fn streamed_file_with_payload() {
    let trees = sample();
    let mut writer = BinaryStreamWriter::begin(Vec::new()).unwrap();
    for tree in &trees {
        writer.push_tree(tree).unwrap();
    }
    assert_eq!(writer.len(), 3);
    let bytes = writer.finish(b"opaque payload").unwrap();

    let mut input = Cursor::new(bytes);
    let metadata = read_metadata(&mut input).unwrap();
    assert!(metadata.has_valid_trailer());
    assert!(!metadata.has_global_names());
    assert_eq!(read_additional_data(&mut input, &metadata).unwrap(), b"opaque payload");

    let iter = BinaryTreeIter::with_metadata(input, metadata);
    assert_eq!(iter.len(), 3);
    let back: Vec<Tree> = iter.collect::<Result<_, _>>().unwrap();
    assert_eq!(back, trees);
}

#[test]
fn collection_edits_survive_rewrite() {
    let bytes = write_trees(Vec::new(), &sample(), &[]).unwrap();
    let mut collection = TreeCollection::from_binary_reader(Cursor::new(bytes)).unwrap();

    let tree = collection.get_mut(2).unwrap();
    let d = tree.node_by_name("D").unwrap();
    tree.prune(d).unwrap();
    collection.remove(0).unwrap();

    let rewritten = collection.write_binary(Vec::new()).unwrap();
    let back = read_all_trees(&mut Cursor::new(rewritten)).unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back[0], sample()[1]);
    assert!(back[1].node_by_name("D").is_none());
    assert_eq!(back[1].leaf_count(), 3);
}
