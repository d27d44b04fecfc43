//! The Python arena walker driven through the snapshot host.

mod common;

use common::{run_commands, session_from_json};

/// One arena at 0x10000 holding one pool: header, then three 0x40-byte
/// blocks of which the first is live, the second is on the free list,
/// and the third was never handed out.
fn python_heap(next_offset: u64) -> String {
    let mut pool_words = vec![0u64; 32];
    pool_words[0] = 0x1; // ref count
    pool_words[1] = 0x10070; // free list head
    pool_words[5] = next_offset | (0xc0 << 32); // next offset, max excess

    format!(
        r#"{{
            "ranges": [
                {{"base": "0x9000", "words": ["0x10000"]}},
                {{"base": "0x10000", "words": [{}]}}
            ],
            "allocations": [],
            "python": {{
                "arena_struct_array": "0x9000",
                "arena_struct_count": 1,
                "arena_struct_size": "0x8",
                "arena_size": "0x100",
                "pool_size": "0x100",
                "active_indices": [0]
            }},
            "patterns": [{{"address": "0x10030", "pattern": "PythonDequeBlock"}}]
        }}"#,
        pool_words
            .iter()
            .map(|w| format!("\"0x{:x}\"", w))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

#[test]
fn test_python_blocks_become_allocations() {
    let session = session_from_json(&python_heap(0xb0));
    let (out, _err) = run_commands(&session, "count used\n");
    assert_eq!(out, "1 allocations use 0x40 (64) bytes.\n");
    let (out, _err) = run_commands(&session, "count free\n");
    assert_eq!(out, "2 allocations use 0x80 (128) bytes.\n");
    let (out, _err) = run_commands(&session, "enumerate allocations\n");
    assert_eq!(out, "0x10030\n0x10070\n0x100b0\n");
}

#[test]
fn test_pattern_tag_reaches_the_describers() {
    let session = session_from_json(&python_heap(0xb0));
    let (out, _err) = run_commands(&session, "describe allocation 0x10030\n");
    assert!(out.contains("This allocation matches pattern PythonDequeBlock."));
    let (out, _err) = run_commands(&session, "count used /pattern PythonDequeBlock\n");
    assert_eq!(out, "1 allocations use 0x40 (64) bytes.\n");
    let (_out, err) = run_commands(&session, "count used /pattern Nonesuch\n");
    assert!(err.contains("Pattern \"Nonesuch\" is not recognized."));
}

/// One pool with all three blocks live; the first block points at the
/// third, which carries the PythonDequeBlock tag.
fn python_heap_with_reference() -> String {
    let mut pool_words = vec![0u64; 32];
    pool_words[0] = 0x1; // ref count
    pool_words[5] = 0xf0 | (0xc0 << 32); // next offset, max excess
    pool_words[6] = 0x100b0; // first word of the first block

    format!(
        r#"{{
            "ranges": [
                {{"base": "0x9000", "words": ["0x10000"]}},
                {{"base": "0x10000", "words": [{}]}}
            ],
            "allocations": [],
            "python": {{
                "arena_struct_array": "0x9000",
                "arena_struct_count": 1,
                "arena_struct_size": "0x8",
                "arena_size": "0x100",
                "pool_size": "0x100",
                "active_indices": [0]
            }},
            "patterns": [{{"address": "0x100b0", "pattern": "PythonDequeBlock"}}]
        }}"#,
        pool_words
            .iter()
            .map(|w| format!("\"0x{:x}\"", w))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

#[test]
fn test_extend_rule_takes_a_bare_pattern_name() {
    let session = session_from_json(&python_heap_with_reference());
    // Extension side: only the tagged block is taken.
    let (out, err) = run_commands(
        &session,
        "enumerate allocation 0x10030 /extend ->PythonDequeBlock\n",
    );
    assert!(err.is_empty());
    assert_eq!(out, "0x10030\n0x100b0\n");
    // Member side: the tagged block extends along its incoming edge.
    let (out, err) = run_commands(
        &session,
        "enumerate allocation 0x100b0 /extend PythonDequeBlock<-\n",
    );
    assert!(err.is_empty());
    assert_eq!(out, "0x100b0\n0x10030\n");
}

#[test]
fn test_corrupt_pool_header_is_conservative() {
    // next_offset not a whole number of blocks: the walker warns and
    // treats every block as handed out. The free list is still honored,
    // so only the listed block comes back free.
    let spec: heapscope_commands::snapshot::SnapshotSpec =
        serde_json::from_str(&python_heap(0xb1)).unwrap();
    let (session, warnings) = heapscope_commands::snapshot::build_session(spec).unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Probable corruption in header for python pool at 0x10000"));
    let (out, _err) = run_commands(&session, "count free\n");
    assert_eq!(out, "1 allocations use 0x40 (64) bytes.\n");
    let (out, _err) = run_commands(&session, "count used\n");
    assert_eq!(out, "2 allocations use 0x80 (128) bytes.\n");
}
