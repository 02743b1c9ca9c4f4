// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use rs232_to_pdu::{
    app::App,
    cfg::{cli::resolve_config_path, logger::init_logger},
};

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("config/logging.yaml")?;

    let config_path = resolve_config_path("config.yaml").context("failed to resolve gateway config path")?;

    App::new(config_path.to_string_lossy().into_owned()).run().await
}
