// This file is used to ensure that all modules are linked and registered via inventory.
// In future we can simply DX via build.rs which will collect all crates in ./modules and
// generate this file. But for now we will manually maintain this file.
#![allow(unused_imports)]

use workflow_engine as _;
