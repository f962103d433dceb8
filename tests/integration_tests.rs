use budget_tree_builder::*;

/// A row with labels in the three name columns and, when `total` is set, the
/// full complement of twelve numeric measures (the last being the
/// current-year total the parser reads).
fn row(c0: &str, c1: &str, c2: &str, total: Option<f64>) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();
    for text in [c0, c1, c2] {
        cells.push(if text.is_empty() {
            Cell::Empty
        } else {
            text.into()
        });
    }
    match total {
        Some(value) => {
            for _ in 0..11 {
                cells.push(1.0.into());
            }
            cells.push(value.into());
        }
        None => cells.extend(std::iter::repeat(Cell::Empty).take(12)),
    }
    cells
}

fn amount_header_row() -> Vec<Cell> {
    let mut cells = vec![Cell::Empty, Cell::Empty, Cell::Empty];
    for _ in 0..4 {
        cells.push("Revenue".into());
        cells.push("Capital".into());
        cells.push("Total".into());
    }
    cells
}

/// A complete synthetic demand sheet: header block, one closed group and an
/// ordinary leaf in section A, and a net-aggregated group in section B.
fn demand_sheet(net_amount: f64) -> Sheet {
    Sheet::from_rows(vec![
        vec!["Ministry of Magic\nDemand No. 7\nDepartment of Mysteries".into()],
        vec!["Budget Estimates 2023-2024".into()],
        amount_header_row(),
        vec!["Gross".into()],
        vec!["Recoveries".into()],
        vec!["Receipts".into()],
        vec!["Net".into()],
        row("A. Revenue Expenditure", "", "", Some(750.0)),
        row("", "Secretariat", "", None),
        row("", "", "Salaries", Some(300.0)),
        row("", "", "Allowances", Some(200.0)),
        row("", "Total - Secretariat", "", Some(500.0)),
        row("", "Grants to States", "", Some(250.0)),
        row("B. Capital Expenditure", "", "", Some(150.0)),
        row("", "Construction", "", None),
        row("", "", "Gross", Some(140.0)),
        row("", "", "Recoveries", Some(-40.0)),
        row("", "", "Net", Some(net_amount)),
        row("", "Machinery", "", Some(50.0)),
    ])
}

fn unparsable_sheet() -> Sheet {
    Sheet::from_rows(vec![
        vec!["Annexure: summary of appropriations".into()],
        vec!["misc".into(), 1.0.into()],
    ])
}

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_workbook_parse_end_to_end() {
    let config = ParseConfig::default();
    let sheets = vec![demand_sheet(100.0), unparsable_sheet()];

    let parsed = parse_workbook(&sheets, &config, &AcceptNet).unwrap();
    assert_eq!(parsed.len(), 1, "the structureless sheet is skipped");

    let sheet = &parsed[0];
    assert_eq!(
        sheet.header,
        vec!["Ministry of Magic", "Demand No. 7", "Department of Mysteries"]
    );
    assert_eq!(sheet.demand_no(), Some(7));

    let expected = [
        (path(&["A. Revenue Expenditure"]), 750.0),
        (path(&["A. Revenue Expenditure", "Secretariat", "Salaries"]), 300.0),
        (path(&["A. Revenue Expenditure", "Secretariat", "Allowances"]), 200.0),
        (path(&["A. Revenue Expenditure", "Secretariat"]), 500.0),
        (path(&["A. Revenue Expenditure", "Grants to States"]), 250.0),
        (path(&["B. Capital Expenditure"]), 150.0),
        (path(&["B. Capital Expenditure", "Construction"]), 100.0),
        (path(&["B. Capital Expenditure", "Machinery"]), 50.0),
    ];
    for (head_path, amount) in &expected {
        assert!(
            sheet
                .heads
                .iter()
                .any(|h| h.path == *head_path && (h.amount - amount).abs() < 1e-9),
            "missing head {:?} = {}",
            head_path,
            amount
        );
    }
    assert_eq!(sheet.heads.len(), expected.len());
}

#[test]
fn test_sheet_structure_discovery() {
    let config = ParseConfig::default();
    let structure = locate_structure(&demand_sheet(100.0), &config).unwrap();

    assert_eq!(structure.amount_cols, (3..15).collect::<Vec<_>>());
    assert_eq!(structure.sections.len(), 2);
    assert_eq!(structure.sections[0].name, 'A');
    assert_eq!(structure.sections[0].start, 7);
    assert_eq!(structure.sections[0].end, 13);
    assert_eq!(structure.sections[1].name, 'B');
    assert_eq!(structure.sections[1].end, 19);
}

#[test]
fn test_declined_net_mismatch_is_fatal() {
    let config = ParseConfig::default();
    // Net row states 200 while Gross + Recoveries = 100.
    let sheets = vec![demand_sheet(200.0)];

    let err = parse_workbook(&sheets, &config, &DeclineNet).unwrap_err();
    assert!(matches!(err, BudgetError::NetMismatchDeclined { .. }));

    let accepted = parse_workbook(&sheets, &config, &AcceptNet).unwrap();
    assert!(accepted[0]
        .heads
        .iter()
        .any(|h| h.path == path(&["B. Capital Expenditure", "Construction"]) && h.amount == 200.0));
}

#[test]
fn test_tree_assembly_and_serialization() {
    let config = ParseConfig::default();
    let parsed = parse_workbook(&[demand_sheet(100.0)], &config, &AcceptNet).unwrap();

    let root = assemble_national_tree(&parsed, "Union Budget");
    // Only section A feeds the tree.
    assert!((root.total() - 750.0).abs() < 1e-9);

    let dept = root
        .get_path(&["Ministry of Magic", "Department of Mysteries"])
        .unwrap();
    assert!((dept.get_path(&["Secretariat"]).unwrap().total() - 500.0).abs() < 1e-9);
    assert!(dept.get_path(&["Secretariat", "Salaries"]).is_some());
    assert!(root.get_path(&["Ministry of Magic", "No Such Department"]).is_none());

    let rendered = root.serialize_tree(Some(1), &config);
    assert!(rendered.contains("[BudgetNode] Union Budget"));
    assert!(rendered.contains("[BudgetNode] Ministry of Magic"));
    assert!(!rendered.contains("Secretariat"));

    let rows = root.serialize_rows(&config);
    assert!(!rows.is_empty());
    let width = rows[0].path.len();
    assert!(rows.iter().all(|r| r.path.len() == width));
}

#[test]
fn test_edge_table_round_trip() {
    let config = ParseConfig::default();
    let parsed = parse_workbook(&[demand_sheet(100.0)], &config, &AcceptNet).unwrap();
    let root = assemble_national_tree(&parsed, "Union Budget");

    let table = EdgeTable::from_tree(&root, &config);
    assert!(!table.rows.is_empty());

    let sorted_keys: Vec<(String, String)> = table
        .rows
        .iter()
        .map(|r| (r.source_abbrev.clone(), r.dest_abbrev.clone()))
        .collect();
    let mut expected = sorted_keys.clone();
    expected.sort();
    assert_eq!(sorted_keys, expected);

    let (nodes, links) = table.nodes_and_edges();
    let mut distinct = std::collections::HashSet::new();
    for row in &table.rows {
        distinct.insert(row.source_abbrev.clone());
        distinct.insert(row.dest_abbrev.clone());
    }
    assert_eq!(nodes.len(), distinct.len());
    assert_eq!(links.len(), table.rows.len());
}

#[test]
fn test_csv_artifacts() -> anyhow::Result<()> {
    let config = ParseConfig::default();
    let parsed = parse_workbook(&[demand_sheet(100.0)], &config, &AcceptNet)?;
    let root = assemble_national_tree(&parsed, "Union Budget");

    let entries = demands_directory(&parsed);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].csv_name, "dno_7.csv");

    let mut dir_csv = Vec::new();
    write_demands_directory(&entries, &mut dir_csv)?;
    let dir_text = String::from_utf8(dir_csv)?;
    assert!(dir_text.contains("7,Ministry of Magic,Department of Mysteries,dno_7.csv"));

    let out_dir = std::env::temp_dir().join("budget_tree_builder_it");
    write_ministry_edge_csvs(&root, &out_dir, &config)?;
    assert!(out_dir.join("overview.csv").exists());
    assert!(out_dir.join("mom.csv").exists(), "per-ministry CSV named by abbreviation");

    let overview = std::fs::read_to_string(out_dir.join("overview.csv"))?;
    assert!(overview.starts_with(
        "id,source_name,dest_name,source_abbrev,dest_abbrev,amount,amount_inr,amount_usd"
    ));
    // Depth-limited overview: ministries yes, departments no.
    assert!(overview.contains("ub_mom"));
    assert!(!overview.contains("ub_mom_dom"));

    std::fs::remove_dir_all(&out_dir).ok();
    Ok(())
}

#[test]
fn test_parsed_sheet_json_interchange() {
    let config = ParseConfig::default();
    let parsed = parse_workbook(&[demand_sheet(100.0)], &config, &AcceptNet).unwrap();

    let json = parsed[0].to_json().unwrap();
    assert!(json.contains("list_of_heads"));
    let back = ParsedSheet::from_json(&json).unwrap();
    assert_eq!(back.heads.len(), parsed[0].heads.len());
}
