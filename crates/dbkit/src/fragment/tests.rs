use super::*;
use crate::value::Param;

#[test]
fn parity_accepts_backslash_before_closing_quote() {
    let mut q = SqlFragment::new(r"SELECT * FROM files WHERE dir = 'C:\' AND owner = ?");
    q.add("alice");
    assert_eq!(
        q.to_sql().unwrap(),
        r"SELECT * FROM files WHERE dir = 'C:\' AND owner = ?"
    );
    assert_eq!(q.params(), vec![Param::Text("alice".to_string())]);
}

#[test]
fn raw_text_passes_through_without_ctes() {
    let mut q = SqlFragment::new("SELECT * FROM users WHERE a = ?");
    q.add(1);
    assert_eq!(q.to_sql().unwrap(), "SELECT * FROM users WHERE a = ?");
    assert_eq!(q.params(), vec![Param::Int32(1)]);
}

#[test]
fn append_coalesces_text_and_merges_params() {
    let mut w = SqlFragment::empty();
    w.append(" WHERE id = ?").add(42);

    let mut q = SqlFragment::new("SELECT * FROM users");
    q.append_fragment(&w);

    assert_eq!(q.to_sql().unwrap(), "SELECT * FROM users WHERE id = ?");
    assert_eq!(q.params(), vec![Param::Int32(42)]);
}

#[test]
fn rendering_is_deterministic() {
    let build = || {
        let mut q = SqlFragment::empty();
        let a = q.add_common_table_expression(
            CteKey::new("a"),
            "one",
            SqlFragment::with_params("SELECT ? AS x", [1]),
            false,
        );
        let b = q.add_common_table_expression(
            CteKey::new("b"),
            "two",
            SqlFragment::with_params("SELECT ? AS y", [2]),
            false,
        );
        q.append("SELECT * FROM ")
            .append_token(&a)
            .append(" JOIN ")
            .append_token(&b)
            .append(" ON 1=1 WHERE z = ?")
            .add("zz");
        q
    };

    let q1 = build();
    let q2 = build();
    assert_eq!(q1.to_sql().unwrap(), q2.to_sql().unwrap());
    assert_eq!(q1.params(), q2.params());
    // A second render of the same fragment is byte-identical too.
    assert_eq!(q1.to_sql().unwrap(), q1.to_sql().unwrap());
    assert_eq!(q1, q2);
}

#[test]
fn placeholder_parameter_mismatch_is_a_hard_failure() {
    let q = SqlFragment::new("SELECT * FROM t WHERE a = ?");
    let err = q.to_sql().unwrap_err();
    assert!(matches!(err, DbError::Composition(_)), "{err}");

    let mut q = SqlFragment::new("SELECT 1");
    q.add(5);
    assert!(q.to_sql().is_err());
}

#[test]
fn placeholders_inside_literals_do_not_count() {
    let mut q = SqlFragment::new("SELECT '?' FROM t WHERE a = ?");
    q.add(7);
    assert_eq!(q.to_sql().unwrap(), "SELECT '?' FROM t WHERE a = ?");
}

#[test]
fn cte_key_registration_is_idempotent() {
    let mut q = SqlFragment::empty();
    let t1 = q.add_common_table_expression(
        CteKey::new("K"),
        "cte1",
        SqlFragment::new("SELECT 1 AS x"),
        false,
    );
    let t2 = q.add_common_table_expression(
        CteKey::new("K"),
        "cte2",
        SqlFragment::new("SELECT 2 AS x"),
        false,
    );
    assert_eq!(t1.key(), t2.key());

    q.append("SELECT * FROM ").append_token(&t2);
    let sql = q.to_sql().unwrap();
    // One definition, first registration's name and body.
    assert_eq!(sql, "WITH cte1 AS (SELECT 1 AS x) SELECT * FROM cte1");
}

#[test]
fn nested_cte_dependencies_are_listed_first() {
    let mut inner = SqlFragment::empty();
    let a_token = inner.add_common_table_expression(
        CteKey::new("A"),
        "base",
        SqlFragment::with_params("SELECT ? AS x", [1]),
        false,
    );
    inner.append("SELECT x + 1 AS x FROM ").append_token(&a_token);

    let mut q = SqlFragment::empty();
    let b_token = q.add_common_table_expression(CteKey::new("B"), "derived", inner, false);
    q.append("SELECT * FROM ").append_token(&b_token);

    assert_eq!(
        q.to_sql().unwrap(),
        "WITH base AS (SELECT ? AS x), derived AS (SELECT x + 1 AS x FROM base) \
         SELECT * FROM derived"
    );
    assert_eq!(q.params(), vec![Param::Int32(1)]);
}

#[test]
fn deeply_nested_dependencies_keep_order() {
    let mut level1 = SqlFragment::empty();
    let t1 = level1.add_common_table_expression(
        CteKey::new("L1"),
        "l1",
        SqlFragment::new("SELECT 1 AS n"),
        false,
    );
    level1.append("SELECT n + 1 AS n FROM ").append_token(&t1);

    let mut level2 = SqlFragment::empty();
    let t2 = level2.add_common_table_expression(CteKey::new("L2"), "l2", level1, false);
    level2.append("SELECT n + 1 AS n FROM ").append_token(&t2);

    let mut q = SqlFragment::empty();
    let t3 = q.add_common_table_expression(CteKey::new("L3"), "l3", level2, false);
    q.append("SELECT n FROM ").append_token(&t3);

    let sql = q.to_sql().unwrap();
    let p1 = sql.find("l1 AS (").unwrap();
    let p2 = sql.find("l2 AS (").unwrap();
    let p3 = sql.find("l3 AS (").unwrap();
    assert!(p1 < p2 && p2 < p3, "{sql}");
}

#[test]
fn cte_body_params_precede_main_params() {
    let a = SqlFragment::with_params("SELECT * FROM t WHERE x = ?", [5]);
    let mut b = SqlFragment::empty();
    let token = b.add_common_table_expression(CteKey::new("K"), "CTE", a, false);
    b.append("SELECT * FROM ")
        .append_token(&token)
        .append(" WHERE y = ?")
        .add("xxyzzy");

    assert_eq!(
        b.params(),
        vec![Param::Int32(5), Param::Text("xxyzzy".to_string())]
    );
    assert_eq!(
        b.to_sql().unwrap(),
        "WITH CTE AS (SELECT * FROM t WHERE x = ?) SELECT * FROM CTE WHERE y = ?"
    );
}

#[test]
fn append_merges_cte_maps() {
    let mut f1 = SqlFragment::empty();
    let t1 = f1.add_common_table_expression(
        CteKey::new("K1"),
        "first",
        SqlFragment::new("SELECT 1 AS a"),
        false,
    );
    f1.append("SELECT * FROM ").append_token(&t1);

    let mut f2 = SqlFragment::empty();
    let t2 = f2.add_common_table_expression(
        CteKey::new("K2"),
        "second",
        SqlFragment::new("SELECT 2 AS b"),
        false,
    );
    f2.append(" UNION ALL SELECT * FROM ").append_token(&t2);

    f1.append_fragment(&f2);
    let sql = f1.to_sql().unwrap();
    assert_eq!(
        sql,
        "WITH first AS (SELECT 1 AS a), second AS (SELECT 2 AS b) \
         SELECT * FROM first UNION ALL SELECT * FROM second"
    );
    assert_eq!(sql.matches("first AS (").count(), 1);
    assert_eq!(sql.matches("second AS (").count(), 1);
}

#[test]
fn same_key_from_independent_fragments_merges_to_one_definition() {
    let mut f1 = SqlFragment::empty();
    let t1 = f1.add_common_table_expression(
        CteKey::new("shared"),
        "tenant_filter",
        SqlFragment::with_params("SELECT id FROM tenants WHERE org = ?", ["acme"]),
        false,
    );
    f1.append("SELECT * FROM ").append_token(&t1);

    let mut f2 = SqlFragment::empty();
    let t2 = f2.add_common_table_expression(
        CteKey::new("shared"),
        "other_name",
        SqlFragment::with_params("SELECT id FROM tenants WHERE org = ?", ["acme"]),
        false,
    );
    f2.append(" INTERSECT SELECT * FROM ").append_token(&t2);

    f1.append_fragment(&f2);
    let sql = f1.to_sql().unwrap();
    assert_eq!(sql.matches(" AS (").count(), 1, "{sql}");
    assert_eq!(
        sql,
        "WITH tenant_filter AS (SELECT id FROM tenants WHERE org = ?) \
         SELECT * FROM tenant_filter INTERSECT SELECT * FROM tenant_filter"
    );
    // Only the surviving definition's parameters are bound.
    assert_eq!(f1.params(), vec![Param::Text("acme".to_string())]);
}

#[test]
fn distinct_keys_with_identical_bodies_are_not_merged() {
    let mut q = SqlFragment::empty();
    let t1 =
        q.add_common_table_expression(CteKey::new("K1"), "dup", SqlFragment::new("SELECT 1"), false);
    let t2 =
        q.add_common_table_expression(CteKey::new("K2"), "dup", SqlFragment::new("SELECT 1"), false);
    q.append("SELECT * FROM ")
        .append_token(&t1)
        .append(", ")
        .append_token(&t2);

    assert_eq!(
        q.to_sql().unwrap(),
        "WITH dup AS (SELECT 1), dup_2 AS (SELECT 1) SELECT * FROM dup, dup_2"
    );
}

#[test]
fn recursive_keyword_emitted_once_if_any_cte_is_recursive() {
    let mut q = SqlFragment::empty();
    let plain = q.add_common_table_expression(
        CteKey::new("plain"),
        "plain",
        SqlFragment::new("SELECT 1 AS n"),
        false,
    );
    let mut walk_body = SqlFragment::new("SELECT 1 AS n UNION ALL SELECT n + 1 FROM ");
    // A recursive body references itself through its own token.
    let walk_token = CteToken::new(CteKey::new("walk"));
    walk_body.append_token(&walk_token).append(" WHERE n < 5");
    let walk = q.add_common_table_expression(CteKey::new("walk"), "walk", walk_body, true);

    q.append("SELECT * FROM ")
        .append_token(&plain)
        .append(", ")
        .append_token(&walk);

    let sql = q.to_sql().unwrap();
    assert!(sql.starts_with("WITH RECURSIVE "), "{sql}");
    assert_eq!(sql.matches("RECURSIVE").count(), 1);
    assert!(sql.contains("UNION ALL SELECT n + 1 FROM walk WHERE n < 5"));
}

#[test]
fn unregistered_token_reference_fails() {
    let mut q = SqlFragment::empty();
    let mut other = SqlFragment::empty();
    let token = other.add_common_table_expression(
        CteKey::new("elsewhere"),
        "x",
        SqlFragment::new("SELECT 1"),
        false,
    );
    // Token embedded without merging the registration.
    q.append("SELECT * FROM ").append_token(&token);
    let err = q.to_sql().unwrap_err();
    assert!(matches!(err, DbError::Composition(_)), "{err}");
}

#[test]
fn shared_body_mutation_is_visible_to_all_referrers() {
    let mut f1 = SqlFragment::empty();
    let token = f1.add_common_table_expression(
        CteKey::new("K"),
        "flt",
        SqlFragment::new("SELECT id FROM t"),
        false,
    );
    f1.append("SELECT * FROM ").append_token(&token);

    let mut f2 = SqlFragment::new("SELECT count(*) FROM ");
    f2.append_token(&token);
    let mut merged = SqlFragment::empty();
    merged.append_fragment(&f1);

    f1.common_table_expression(&CteKey::new("K"))
        .unwrap()
        .update(|body| {
            body.append(" WHERE active = ?").add(true);
        });

    // Both the original and the merged copy see the mutated body.
    assert!(f1.to_sql().unwrap().contains("WHERE active = ?"));
    assert!(merged.to_sql().unwrap().contains("WHERE active = ?"));
    assert_eq!(merged.params(), vec![Param::Bool(true)]);
}

#[test]
fn deep_clone_isolates_cte_bodies() {
    let mut f1 = SqlFragment::empty();
    let token = f1.add_common_table_expression(
        CteKey::new("K"),
        "flt",
        SqlFragment::new("SELECT id FROM t"),
        false,
    );
    f1.append("SELECT * FROM ").append_token(&token);

    let isolated = f1.deep_clone();
    f1.common_table_expression(&CteKey::new("K"))
        .unwrap()
        .update(|body| {
            body.append(" WHERE x = 1");
        });

    assert!(f1.to_sql().unwrap().contains("WHERE x = 1"));
    assert!(!isolated.to_sql().unwrap().contains("WHERE x = 1"));
}

#[test]
fn never_rendered_fragment_does_no_cte_work() {
    // Registering and then dropping a fragment must not panic or render.
    let mut q = SqlFragment::empty();
    let _ = q.add_common_table_expression(
        CteKey::unique(),
        "unused",
        SqlFragment::new("SELECT 1"),
        false,
    );
    drop(q);
}

#[test]
fn alias_sanitization_produces_legal_identifiers() {
    let mut q = SqlFragment::empty();
    let token = q.add_common_table_expression(
        CteKey::new("K"),
        "1 weird name!",
        SqlFragment::new("SELECT 1"),
        false,
    );
    q.append("SELECT * FROM ").append_token(&token);
    assert_eq!(
        q.to_sql().unwrap(),
        "WITH cte_1_weird_name_ AS (SELECT 1) SELECT * FROM cte_1_weird_name_"
    );
}

#[test]
fn equality_is_over_rendered_form() {
    let mut a = SqlFragment::new("SELECT ");
    a.append("1");
    let b = SqlFragment::new("SELECT 1");
    assert_eq!(a, b);

    let mut c = SqlFragment::new("SELECT ?");
    c.add(1);
    let mut d = SqlFragment::new("SELECT ?");
    d.add(2);
    assert_ne!(c, d);
}
