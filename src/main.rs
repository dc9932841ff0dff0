// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

fn main() {
    let app = romflash::cli::build_app();
    let matches = app.get_matches();

    if let Err(err) = romflash::cli::dispatch(&matches) {
        eprintln!("romflash: {err}");
        std::process::exit(1);
    }
}
