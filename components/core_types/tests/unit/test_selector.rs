use core_types::SelectorTable;

#[test]
fn test_interning_preserves_spelling() {
    let mut table = SelectorTable::new();
    let sel = table.intern("doesNotUnderstand:");
    assert_eq!(table.name(sel), "doesNotUnderstand:");
}

#[test]
fn test_selector_table_growth() {
    let mut table = SelectorTable::new();
    assert!(table.is_empty());
    for name in ["value", "value:", "value:value:", "whileTrue:", "=="] {
        table.intern(name);
    }
    assert_eq!(table.len(), 5);
    // Re-interning does not grow the table.
    table.intern("value");
    assert_eq!(table.len(), 5);
}

#[test]
fn test_binary_selector_arity() {
    let mut table = SelectorTable::new();
    for op in ["+", "-", "<", ">=", "~=", "@"] {
        let sel = table.intern(op);
        assert_eq!(table.arg_count(sel), 1, "{} should be binary", op);
    }
}
