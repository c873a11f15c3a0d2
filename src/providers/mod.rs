pub mod swiftly;
