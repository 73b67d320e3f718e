//! SQL generation tests across dialects. Pure — no database needed.

use sqlgate::{
    BindValue, DataValue, DbType, Direction, Error, Logic, ParamStyle, Query, Raw, cond,
};
use sqlgate::builder::expr::expand_placeholders;

fn dv(v: impl Into<DataValue>) -> DataValue {
    v.into()
}

#[test]
fn test_plain_select() {
    let (sql, binds) = Query::table_for(DbType::Mysql, "user").build_select().unwrap();
    assert_eq!(sql, "SELECT * FROM `user`");
    assert!(binds.is_empty());
}

#[test]
fn test_select_with_everything() {
    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .alias("u")
        .field("id, username as name2")
        .distinct(true)
        .left_join("profile p", "p.user_id = u.id")
        .where_eq("status", 1i64)
        .group("type")
        .having("count(*) > 1")
        .order("id desc")
        .limit_offset(20, 10)
        .comment("list users")
        .build_select()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT DISTINCT `id`,`username` AS `name2` FROM `user` `u` \
         LEFT JOIN `profile` `p` ON `p`.`user_id`=`u`.`id` \
         WHERE `status` = :p1 GROUP BY `type` HAVING count(*) > 1 \
         ORDER BY `id` DESC LIMIT 20,10 /* list users */"
    );
}

#[test]
fn test_empty_in_policies() {
    let (sql, binds) = Query::table_for(DbType::Mysql, "t")
        .where_in("id", Vec::<i64>::new())
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE 0 = 1");
    assert!(binds.is_empty());

    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_not_in("id", Vec::<i64>::new())
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE 1 = 1");
}

#[test]
fn test_single_element_in_collapses_to_equality() {
    let (sql, binds) = Query::table_for(DbType::Mysql, "t")
        .where_in("id", vec![5i64, 5i64])
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE `id` = :p1");
    assert_eq!(binds.values(), vec![BindValue::Int(5)]);

    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_not_in("id", vec![5i64])
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE `id` <> :p1");
}

#[test]
fn test_in_deduplicates_preserving_order() {
    let (sql, binds) = Query::table_for(DbType::Mysql, "t")
        .where_in("id", vec![3i64, 2, 3, 1])
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE `id` IN (:p1,:p2,:p3)");
    assert_eq!(
        binds.values(),
        vec![BindValue::Int(3), BindValue::Int(2), BindValue::Int(1)]
    );
}

#[test]
fn test_in_binds_declared_integer_type() {
    // String inputs on a declared integer column coerce by type, not shape
    let (_, binds) = Query::table_for(DbType::Mysql, "t")
        .field_types(vec![("id", "int(10) unsigned")])
        .where_in("id", vec!["3", "2"])
        .build_select()
        .unwrap();
    assert_eq!(binds.values(), vec![BindValue::Int(3), BindValue::Int(2)]);
}

#[test]
fn test_between_array_and_string_render_identically() {
    let a = Query::table_for(DbType::Mysql, "t")
        .field_types(vec![("id", "int")])
        .where_between("id", vec![1i64, 10i64])
        .build_select()
        .unwrap();
    let b = Query::table_for(DbType::Mysql, "t")
        .field_types(vec![("id", "int")])
        .where_between("id", "1,10")
        .build_select()
        .unwrap();
    assert_eq!(a.0, b.0);
    assert_eq!(a.1.values(), b.1.values());
    assert_eq!(a.0, "SELECT * FROM `t` WHERE `id` BETWEEN :p1 AND :p2");
}

#[test]
fn test_like_patterns_joined_by_logic() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_like_any("name", vec!["a%", "b%"], Logic::Or)
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `t` WHERE (`name` LIKE :p1 OR `name` LIKE :p2)"
    );
}

#[test]
fn test_unknown_operator_fails_at_render_time() {
    // Building the query is fine; only rendering rejects the token
    let query = Query::table_for(DbType::Mysql, "t").where_op("id", "LIKEISH", 1i64);
    let err = query.build_select().expect_err("render must fail");
    match err {
        Error::Condition { message } => assert!(message.contains("LIKEISH")),
        other => panic!("expected condition error, got {other:?}"),
    }
}

#[test]
fn test_nested_groups_and_empty_group_elision() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_eq("status", 1i64)
        .where_group(
            Logic::Or,
            vec![cond("type", "=", 2i64), cond("type", "=", 3i64)],
        )
        .where_group(Logic::Or, vec![])
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `t` WHERE `status` = :p1 AND ( `type` = :p2 OR `type` = :p3 )"
    );
}

#[test]
fn test_null_operators() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_null("deleted_at")
        .where_not_null("name")
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `t` WHERE `deleted_at` IS NULL AND `name` IS NOT NULL"
    );
}

#[test]
fn test_equality_with_null_degrades_to_is_null() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_eq("parent", BindValue::Null)
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE `parent` IS NULL");
}

#[test]
fn test_json_member_null_matches_absent_and_explicit_null() {
    // MySQL distinguishes a JSON null from SQL NULL; both sides are covered
    let (sql, _) = Query::table_for(DbType::Mysql, "goods")
        .where_null("extend->brand")
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `goods` WHERE (json_extract(`extend`, '$.brand') IS NULL \
         OR json_type(json_extract(`extend`, '$.brand')) = 'NULL')"
    );

    // PostgreSQL `->>` already collapses both cases to SQL NULL
    let (sql, _) = Query::table_for(DbType::Pgsql, "goods")
        .where_null("extend->brand")
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM \"goods\" WHERE \"extend\"->>'brand' IS NULL");
}

#[test]
fn test_exp_operator_requires_raw() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .where_exp("score", Raw::new("> `base` + 10"))
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE ( `score` > `base` + 10 )");

    let err = Query::table_for(DbType::Mysql, "t")
        .where_op("score", "EXP", 1i64)
        .build_select()
        .expect_err("EXP with a scalar must fail");
    assert!(matches!(err, Error::Condition { .. }));
}

#[test]
fn test_subquery_in() {
    let sub = Query::table_for(DbType::Mysql, "banned").field("user_id");
    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .where_in_query("id", sub)
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `user` WHERE `id` IN ( SELECT `user_id` FROM `banned` )"
    );
}

#[test]
fn test_raw_where_binds_merge() {
    let (sql, binds) = Query::table_for(DbType::Mysql, "t")
        .where_raw(Raw::with_binds(
            "`score` > :min_score",
            vec![("min_score".to_string(), BindValue::Int(10))],
        ))
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE `score` > :min_score");
    assert_eq!(binds.values(), vec![BindValue::Int(10)]);
}

#[test]
fn test_numeric_looking_string_keeps_string_binding() {
    let (_, binds) = Query::table_for(DbType::Mysql, "t")
        .field_types(vec![("code", "varchar(8)")])
        .where_eq("code", "007")
        .build_select()
        .unwrap();
    assert_eq!(binds.values(), vec![BindValue::Str("007".into())]);
}

#[test]
fn test_temporal_coercion_from_unix_timestamp() {
    let (_, binds) = Query::table_for(DbType::Mysql, "t")
        .field_types(vec![("created_at", "datetime")])
        .where_op("created_at", ">", 86400i64)
        .build_select()
        .unwrap();
    assert_eq!(
        binds.values(),
        vec![BindValue::Str("1970-01-02 00:00:00".into())]
    );
}

#[test]
fn test_order_variants() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .order_field("type", vec![3i64, 2, 1], Some(Direction::Desc))
        .order_raw(Raw::new("length(`name`)"))
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `t` ORDER BY field(`type`,:p1,:p2,:p3) DESC,length(`name`)"
    );
}

#[test]
fn test_order_rand_per_dialect() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t").order_rand().build_select().unwrap();
    assert_eq!(sql, "SELECT * FROM `t` ORDER BY rand()");

    let (sql, _) = Query::table_for(DbType::Pgsql, "t").order_rand().build_select().unwrap();
    assert_eq!(sql, "SELECT * FROM \"t\" ORDER BY RANDOM()");
}

#[test]
fn test_malformed_order_token_is_hard_error() {
    let err = Query::table_for(DbType::Mysql, "t")
        .order("id; drop table t")
        .build_select()
        .expect_err("malformed order token");
    assert!(matches!(err, Error::Condition { .. }));
}

#[test]
fn test_limit_syntax_per_dialect() {
    let (sql, _) = Query::table_for(DbType::Pgsql, "t")
        .limit_offset(20, 10)
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM \"t\" LIMIT 10 OFFSET 20");

    let (sql, _) = Query::table_for(DbType::Sqlite, "t")
        .page(3, 10)
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM \"t\" LIMIT 20,10");
}

#[test]
fn test_oracle_pagination_wraps_whole_statement() {
    let (sql, _) = Query::table_for(DbType::Oracle, "user")
        .field("id,name")
        .limit_offset(20, 10)
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM (SELECT paged.*, rownum AS numrow FROM \
         (SELECT \"id\",\"name\" FROM \"user\") paged ) \
         WHERE (numrow > 20) AND (numrow <= 30)"
    );
}

#[test]
fn test_lock_clause_per_dialect() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t").lock(true).build_select().unwrap();
    assert_eq!(sql, "SELECT * FROM `t` FOR UPDATE");

    // SQLite has no row locks; the clause is dropped
    let (sql, _) = Query::table_for(DbType::Sqlite, "t").lock(true).build_select().unwrap();
    assert_eq!(sql, "SELECT * FROM \"t\"");

    let (sql, _) = Query::table_for(DbType::Oracle, "t").lock(true).build_select().unwrap();
    assert!(sql.ends_with("FOR UPDATE NOWAIT"));
}

#[test]
fn test_insert_binds_values() {
    let data = vec![
        ("id".to_string(), dv(7i64)),
        ("username".to_string(), dv("qweqwe")),
    ];
    let (sql, binds) = Query::table_for(DbType::Mysql, "user")
        .build_insert(&data)
        .unwrap();
    assert_eq!(sql, "INSERT INTO `user` (`id`,`username`) VALUES (:p1,:p2)");
    assert_eq!(binds.len(), 2);
}

#[test]
fn test_replace_and_extra_modifiers() {
    let data = vec![("id".to_string(), dv(1i64))];
    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .replace()
        .build_insert(&data)
        .unwrap();
    assert!(sql.starts_with("REPLACE INTO `user`"));

    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .extra("ignore")
        .build_insert(&data)
        .unwrap();
    assert!(sql.starts_with("INSERT IGNORE INTO `user`"));

    // Multi-word extras are rejected rather than rendered
    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .extra("ignore into outfile")
        .build_insert(&data)
        .unwrap();
    assert!(sql.starts_with("INSERT INTO `user`"));
}

#[test]
fn test_insert_all_values_vs_union_all() {
    let rows = vec![
        vec![("id".to_string(), dv(1i64)), ("type".to_string(), dv(3i64))],
        vec![("id".to_string(), dv(2i64)), ("type".to_string(), dv(2i64))],
    ];

    let (sql, binds) = Query::table_for(DbType::Mysql, "user")
        .build_insert_all(&rows)
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO `user` (`id`,`type`) VALUES ( :p1,:p2 ) , ( :p3,:p4 )"
    );
    assert_eq!(binds.len(), 4);

    let (sql, _) = Query::table_for(DbType::Pgsql, "user")
        .build_insert_all(&rows)
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO \"user\" (\"id\",\"type\") SELECT :p1,:p2 UNION ALL SELECT :p3,:p4"
    );
}

#[test]
fn test_insert_all_rejects_mismatched_rows() {
    let rows = vec![
        vec![("id".to_string(), dv(1i64))],
        vec![("type".to_string(), dv(2i64))],
    ];
    let err = Query::table_for(DbType::Mysql, "user")
        .build_insert_all(&rows)
        .expect_err("field mismatch");
    assert!(matches!(err, Error::Condition { .. }));
}

#[test]
fn test_update_data_rendering() {
    let data = vec![
        ("name".to_string(), dv(BindValue::Null)),
        ("score".to_string(), DataValue::Inc(3.0)),
        ("debt".to_string(), DataValue::Dec(1.5)),
        ("note".to_string(), DataValue::Raw(Raw::new("upper(`note`)"))),
    ];
    let (sql, binds) = Query::table_for(DbType::Mysql, "user")
        .where_eq("id", 1i64)
        .build_update(&data)
        .unwrap();
    assert_eq!(
        sql,
        "UPDATE `user` SET `name` = NULL , `score` = `score` + 3 , \
         `debt` = `debt` - 1.5 , `note` = upper(`note`) WHERE `id` = :p1"
    );
    assert_eq!(binds.len(), 1);
}

#[test]
fn test_update_json_member_uses_dialect_json_set() {
    let data = vec![("extend->brand".to_string(), dv("TP8"))];
    let (sql, _) = Query::table_for(DbType::Mysql, "goods")
        .where_eq("id", 1i64)
        .build_update(&data)
        .unwrap();
    assert_eq!(
        sql,
        "UPDATE `goods` SET `extend` = json_set(`extend`, '$.brand', :p1) WHERE `id` = :p2"
    );

    let (sql, _) = Query::table_for(DbType::Pgsql, "goods")
        .where_eq("id", 1i64)
        .build_update(&data)
        .unwrap();
    assert_eq!(
        sql,
        "UPDATE \"goods\" SET \"extend\" = jsonb_set(\"extend\", '{brand}', to_jsonb(:p1)) \
         WHERE \"id\" = :p2"
    );
}

#[test]
fn test_strict_mode_rejects_unknown_field_before_sql() {
    let data = vec![("nickname".to_string(), dv("x"))];
    let err = Query::table_for(DbType::Mysql, "user")
        .field("id,username")
        .where_eq("id", 1i64)
        .build_update(&data)
        .expect_err("unknown field under strict mode");
    match err {
        Error::StrictField { field } => assert_eq!(field, "nickname"),
        other => panic!("expected strict field error, got {other:?}"),
    }
}

#[test]
fn test_non_strict_mode_skips_unknown_field() {
    let data = vec![
        ("username".to_string(), dv("a")),
        ("nickname".to_string(), dv("x")),
    ];
    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .field("id,username")
        .strict(false)
        .where_eq("id", 1i64)
        .build_update(&data)
        .unwrap();
    assert!(sql.contains("`username` ="));
    assert!(!sql.contains("nickname"));
}

#[test]
fn test_delete_with_order_and_limit() {
    let (sql, _) = Query::table_for(DbType::Mysql, "log")
        .where_op("created", "<", 1000i64)
        .order("id")
        .limit(100)
        .build_delete()
        .unwrap();
    assert_eq!(
        sql,
        "DELETE FROM `log` WHERE `created` < :p1 ORDER BY `id` LIMIT 100"
    );
}

#[test]
fn test_soft_delete_appended_to_where() {
    let (sql, _) = Query::table_for(DbType::Mysql, "user")
        .where_eq("status", 1i64)
        .soft_delete("delete_time", "NULL", sqlgate::CondValue::None)
        .build_select()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM `user` WHERE ( `status` = :p1 ) AND `delete_time` IS NULL"
    );
}

#[test]
fn test_comment_cannot_escape() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .comment("note */ DROP TABLE t; /*")
        .build_select()
        .unwrap();
    assert!(sql.contains("/* note"));
    assert!(!sql.contains("DROP TABLE"));
}

#[test]
fn test_force_index() {
    let (sql, _) = Query::table_for(DbType::Mysql, "t")
        .force_index("idx_type")
        .build_select()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` FORCE INDEX ( idx_type )");
}

#[test]
fn test_placeholder_expansion_styles() {
    let (sql, binds) = Query::table_for(DbType::Pgsql, "t")
        .where_eq("a", 1i64)
        .where_eq("b", 2i64)
        .build_select()
        .unwrap();
    let (expanded, values) = expand_placeholders(&sql, &binds, ParamStyle::Dollar).unwrap();
    assert_eq!(expanded, "SELECT * FROM \"t\" WHERE \"a\" = $1 AND \"b\" = $2");
    assert_eq!(values.len(), 2);

    let (expanded, _) = expand_placeholders(&sql, &binds, ParamStyle::Question).unwrap();
    assert_eq!(expanded, "SELECT * FROM \"t\" WHERE \"a\" = ? AND \"b\" = ?");
}

#[test]
fn test_inline_sql_quotes_strings() {
    let sql = Query::table_for(DbType::Mysql, "t")
        .where_eq("name", "o'brien")
        .select_sql()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM `t` WHERE `name` = 'o''brien'");
}

#[test]
fn test_deterministic_rendering() {
    let build = || {
        Query::table_for(DbType::Mysql, "user")
            .field("id,type")
            .where_in("type", vec![3i64, 2, 1])
            .order("id desc")
            .limit(5)
            .build_select()
            .unwrap()
    };
    let (a, a_binds) = build();
    let (b, b_binds) = build();
    assert_eq!(a, b);
    assert_eq!(a_binds.values(), b_binds.values());
}
