use std::fs;
use std::path::Path;

use tinto::graph::UnitigLocation;
use tinto::{index_path, load_index, run_with_args, Args};

#[test]
fn end_to_end_build_and_reload() {
    let work_dir = Path::new("target/test_build_cli_rs");
    fs::create_dir_all(work_dir).expect("Failed to create work dir");

    let graph_path = work_dir.join("unitigs.fa");
    fs::write(&graph_path, ">u0\nAAACAGACTC\n>u1\nCCGCC\n").unwrap();

    // Source 0 covers only the second unitig; source 1 covers both.
    let s0 = work_dir.join("s0.fasta");
    fs::write(&s0, ">r0\nCCGCC\n").unwrap();
    let s1 = work_dir.join("s1.fasta");
    fs::write(&s1, ">r0\nAAACAGACTC\n>r1\nCCGCC\n").unwrap();

    let output = work_dir.join("colors");
    let args = Args {
        input: vec![s0, s1],
        graph: graph_path.clone(),
        k: 3,
        output: output.clone(),
        threads: Some(2),
        chunk: 100,
        verbose: true,
        version: (),
    };
    run_with_args(args).expect("Failed to build the color index");

    let (graph, index) = load_index(&graph_path, 3, &index_path(&output)).unwrap();
    assert_eq!(index.n_colors(), 2);
    assert_eq!(index.color_name(0), Some("s0"));
    assert_eq!(index.color_name(1), Some("s1"));

    let full = |id: u32| {
        let size = graph.unitig_len(id);
        UnitigLocation {
            unitig_id: id,
            offset: 0,
            len: size - 2,
            size,
            strand: true,
        }
    };

    assert_eq!(index.colors_of(&graph, &full(0)).unwrap().to_vec(), vec![1]);
    assert_eq!(
        index.colors_of(&graph, &full(1)).unwrap().to_vec(),
        vec![0, 1]
    );
    assert!(index.contains(&graph, &full(0), 1).unwrap());
    assert!(!index.contains(&graph, &full(0), 0).unwrap());
}
