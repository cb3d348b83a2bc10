use super::*;
use crate::device::Disk;
use crate::layout::Superblock;
use tempfile::TempDir;

fn sample_superblock() -> Superblock {
    Superblock {
        total_volume_blocks: 19,
        node_blocks: 2,
        last_node_blocks: 2,
        bitmap_primary: 1,
        bitmap_secondary: 18,
        first_node_block: 2,
        total_files: 8,
    }
}

fn scratch_disk(dir: &TempDir) -> Disk {
    Disk::create(dir.path().join("volume.img"), 19).expect("create disk")
}

#[test]
fn fresh_bitmap_is_all_free() {
    let bitmap = Bitmap::new(&sample_superblock());
    assert_eq!(bitmap.used_count(), 0);
    for node in 0..8 {
        assert!(!bitmap.test(node).expect("in range"));
    }
    assert_eq!(bitmap.find_free().expect("free"), 0);
}

#[test]
fn set_test_and_clear_round_trip() {
    let mut bitmap = Bitmap::new(&sample_superblock());
    bitmap.set(3, true).expect("set");
    assert!(bitmap.test(3).expect("test"));
    assert_eq!(bitmap.used_count(), 1);

    bitmap.set(3, false).expect("clear");
    assert!(!bitmap.test(3).expect("test"));
    assert_eq!(bitmap.used_count(), 0);
}

#[test]
fn out_of_range_nodes_are_rejected() {
    let mut bitmap = Bitmap::new(&sample_superblock());
    assert!(matches!(bitmap.test(8), Err(FsError::InvalidArgument)));
    assert!(matches!(bitmap.set(8, true), Err(FsError::InvalidArgument)));
}

#[test]
fn find_free_returns_the_lowest_hole() {
    let mut bitmap = Bitmap::new(&sample_superblock());
    for node in 0..5 {
        bitmap.set(node, true).expect("set");
    }
    bitmap.set(2, false).expect("clear");
    assert_eq!(bitmap.find_free().expect("free"), 2);
}

#[test]
fn full_bitmap_reports_no_space() {
    let mut bitmap = Bitmap::new(&sample_superblock());
    for node in 0..8 {
        bitmap.set(node, true).expect("set");
    }
    assert!(matches!(bitmap.find_free(), Err(FsError::NoSpace)));
}

#[test]
fn iter_used_is_ascending_and_complete() {
    let mut bitmap = Bitmap::new(&sample_superblock());
    for node in [6, 1, 4] {
        bitmap.set(node, true).expect("set");
    }
    let used: Vec<u32> = bitmap.iter_used().collect();
    assert_eq!(used, vec![1, 4, 6]);
}

#[test]
fn flush_persists_both_mirrors() {
    let dir = TempDir::new().expect("tempdir");
    let sb = sample_superblock();
    let mut disk = scratch_disk(&dir);

    let mut bitmap = Bitmap::new(&sb);
    bitmap.set(0, true).expect("set");
    bitmap.set(7, true).expect("set");
    bitmap.flush(&mut disk).expect("flush");

    let primary = Bitmap::load_mirror(&disk, &sb, Mirror::Primary).expect("load");
    let secondary = Bitmap::load_mirror(&disk, &sb, Mirror::Secondary).expect("load");
    assert_eq!(primary.words(), bitmap.words());
    assert_eq!(secondary.words(), bitmap.words());
}

#[test]
fn mirrors_diverge_after_a_single_mirror_flush() {
    let dir = TempDir::new().expect("tempdir");
    let sb = sample_superblock();
    let mut disk = scratch_disk(&dir);

    let mut bitmap = Bitmap::new(&sb);
    bitmap.flush(&mut disk).expect("flush");

    // Simulate power loss between the two mirror writes.
    bitmap.set(5, true).expect("set");
    bitmap.flush_mirror(&mut disk, Mirror::Primary).expect("flush primary");

    let primary = Bitmap::load_mirror(&disk, &sb, Mirror::Primary).expect("load");
    let secondary = Bitmap::load_mirror(&disk, &sb, Mirror::Secondary).expect("load");
    assert!(primary.test(5).expect("test"));
    assert!(!secondary.test(5).expect("test"));
    assert_ne!(primary.words(), secondary.words());
}
