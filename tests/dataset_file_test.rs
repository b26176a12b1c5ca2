use std::io::Write;
use vulkan_photomosaic::mosaic::{CIFAR10_SIZE, TILE_LEN};
use vulkan_photomosaic::{Dataset, MosaicError};

#[test]
fn test_loads_full_corpus_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let mut data = vec![0u8; CIFAR10_SIZE * TILE_LEN];
    data[TILE_LEN * 5] = 42;
    file.write_all(&data).unwrap();

    let dataset = Dataset::from_file(file.path()).unwrap();
    assert_eq!(dataset.len(), CIFAR10_SIZE);
    assert_eq!(dataset.entry(5)[0], 42);
}

#[test]
fn test_rejects_truncated_corpus_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&vec![0u8; 10 * TILE_LEN]).unwrap();
    let err = Dataset::from_file(file.path()).unwrap_err();
    assert!(matches!(err, MosaicError::InvalidDataset(_)));
}

#[test]
fn test_missing_corpus_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Dataset::from_file(dir.path().join("cifar-10.bin")).unwrap_err();
    assert!(matches!(err, MosaicError::IoError(_)));
}
