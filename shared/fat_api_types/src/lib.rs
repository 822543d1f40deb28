//! Types shared between the FAT32 driver and whatever request layer sits on top of it
//! (the bundled command-line front end, or an OS callback adapter).

pub mod fs;
