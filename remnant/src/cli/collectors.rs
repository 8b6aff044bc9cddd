use clap::Args;
use prettytable::{format, Cell, Row, Table};
use remnant_common::config::CollectorId;
use remnant_common::error::Result;

#[derive(Args, Debug)]
pub struct Collectors {}

fn describe(id: CollectorId) -> (&'static str, &'static str) {
    match id {
        CollectorId::Windows => (
            "windows",
            "Uninstall registry, shared DLL refcounts, service definitions, prefetch traces",
        ),
        CollectorId::Bundle => (
            "macos",
            "Package receipts, app bundles, per-app Library data folders",
        ),
        CollectorId::PackageDb => (
            "linux",
            "dpkg package database, removed-package config residue, unclaimed paths",
        ),
        CollectorId::Mobile => (
            "android",
            "Package registry, per-app data areas, shared storage folders",
        ),
        CollectorId::Keytrace => (
            "ios",
            "Keychain access groups and snapshot caches of gone apps",
        ),
    }
}

impl Collectors {
    pub fn run(&self) -> Result<()> {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Id").style_spec("b"),
            Cell::new("Platform").style_spec("b"),
            Cell::new("Evidence stores").style_spec("b"),
        ]));
        for id in CollectorId::ALL {
            let (platform, stores) = describe(id);
            table.add_row(Row::new(vec![
                Cell::new(id.as_str()).style_spec("Fb"),
                Cell::new(platform),
                Cell::new(stores),
            ]));
        }
        table.printstd();
        Ok(())
    }
}
