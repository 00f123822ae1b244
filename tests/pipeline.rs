use std::path::PathBuf;
use treenode::consensus::{ConsensusOptions, consensus};
use treenode::distances::{DistanceOptions, PruneMode, fill_distance_matrix, robinson_foulds};
use treenode::io::{TreeFormat, read_trees_file, tree_labels, write_matrix_tsv, write_trees_file};
use treenode::nwka::{WriteOptions, parse_tree};
use treenode::tree::Tree;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("treenode-pipeline-{}-{name}", std::process::id()))
}

fn posterior() -> Vec<Tree> {
    [
        "((A:1,B:1):1,(C:1,D:1):1);",
        "((A:1,B:1):2,(C:1,D:1):2);",
        "((A:1,C:1):1,(B:1,D:1):1);",
    ]
    .iter()
    .map(|t| parse_tree(t).unwrap())
    .collect()
}

#[test]
fn distance_matrix_from_compressed_file() {
    let input = temp_path("posterior.nwk.gz");
    let output = temp_path("rf.tsv");
    write_trees_file(&input, &posterior(), TreeFormat::Nwka, &WriteOptions::newick()).unwrap();

    let trees = read_trees_file(&input).unwrap();
    let names = tree_labels(&trees);
    let options = DistanceOptions { weighted_robinson_foulds: false, edge_length: false, ..Default::default() };
    let matrices = fill_distance_matrix(&trees, &options).unwrap();
    assert!(matrices.weighted_robinson_foulds.is_none());
    let rf = matrices.robinson_foulds.unwrap();
    write_matrix_tsv(&output, &names, &rf).unwrap();

    let text = std::fs::read_to_string(&output).unwrap();
    std::fs::remove_file(&input).unwrap();
    std::fs::remove_file(&output).unwrap();
    assert_eq!(
        text,
        "\ttree1\ttree2\ttree3\ntree1\t0\t0\t2\ntree2\t0\t0\t2\ntree3\t2\t2\t0\n"
    );
}

#[test]
fn pairwise_pruning_ignores_missing_leaves() {
    let trees: Vec<Tree> = ["((A,B),(C,D));", "((A,B),(C,E));", "((A,C),(B,D),E);"]
        .iter()
        .map(|t| parse_tree(t).unwrap())
        .collect();
    let options = DistanceOptions { prune: PruneMode::Pairwise, ..Default::default() };
    let rf = fill_distance_matrix(&trees, &options).unwrap().robinson_foulds.unwrap();
    assert_eq!(rf[0][1], 0.0);
    assert_eq!(rf[0][1], rf[1][0]);
}

#[test]
fn consensus_from_binary_file() {
    let path = temp_path("posterior.trees");
    write_trees_file(&path, &posterior(), TreeFormat::Binary, &WriteOptions::default()).unwrap();
    let trees = read_trees_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let tree = consensus(&trees, &ConsensusOptions::default()).unwrap();
    assert_eq!(robinson_foulds(&tree, &trees[0]).unwrap(), 0);
    let ab = tree.last_common_ancestor_of_names(&["A", "B"]).unwrap();
    assert!((tree[ab].support() - 2.0 / 3.0).abs() < 1e-12);
    assert!((tree[ab].length() - 1.5).abs() < 1e-12);
}
