//! Table-driven vectors for the bracket grammar.

use serde_json::{json, Value};
use tiger_form::{parse_pairs, unflatten, FormError};

struct Vector {
    name: &'static str,
    input: &'static str,
    expect: Value,
}

#[test]
fn accepted_vectors() {
    let vectors = [
        Vector {
            name: "scalar",
            input: "email=a%40b.com",
            expect: json!({"email": "a@b.com"}),
        },
        Vector {
            name: "nested map",
            input: "card[number]=4242&card[exp][month]=12",
            expect: json!({"card": {"number": 4242, "exp": {"month": 12}}}),
        },
        Vector {
            name: "append list",
            input: "expand[]=customer&expand[]=invoice",
            expect: json!({"expand": ["customer", "invoice"]}),
        },
        Vector {
            name: "indexed list out of order",
            input: "items[2]=c&items[0]=a&items[1]=b",
            expect: json!({"items": ["a", "b", "c"]}),
        },
        Vector {
            name: "indexed objects",
            input: "items[0][price]=price_a&items[0][quantity]=2",
            expect: json!({"items": [{"price": "price_a", "quantity": 2}]}),
        },
        Vector {
            name: "sparse indices keep order",
            input: "items[5]=late&items[1]=early",
            expect: json!({"items": ["early", "late"]}),
        },
        Vector {
            name: "empty value",
            input: "description=",
            expect: json!({"description": ""}),
        },
        Vector {
            name: "boolean flags",
            input: "auto_advance=true&paid=false",
            expect: json!({"auto_advance": true, "paid": false}),
        },
    ];

    for vector in vectors {
        let doc = unflatten(&parse_pairs(vector.input))
            .unwrap_or_else(|err| panic!("vector `{}` failed: {err}", vector.name));
        assert_eq!(doc, vector.expect, "vector `{}`", vector.name);
    }
}

#[test]
fn rejected_vectors() {
    let rejected: [(&str, &str); 5] = [
        ("oversized index", "k[999999]=v"),
        ("index just above the cap", "k[1001]=v"),
        ("depth eleven", "k[a][b][c][d][e][f][g][h][i][j]=v"),
        ("append mid-key", "k[][sub]=v"),
        ("bare brackets", "[x]=v"),
    ];
    for (name, input) in rejected {
        assert!(
            unflatten(&parse_pairs(input)).is_err(),
            "vector `{name}` should be rejected"
        );
    }
}

#[test]
fn index_at_cap_is_accepted() {
    let doc = unflatten(&parse_pairs("k[1000]=v")).expect("doc");
    assert_eq!(doc["k"].as_array().expect("array").len(), 1);
}

#[test]
fn param_count_cap_is_exact() {
    let exactly_max: Vec<(String, String)> = (0..1000)
        .map(|n| (format!("k{n}"), "v".to_string()))
        .collect();
    assert!(unflatten(&exactly_max).is_ok());

    let one_over: Vec<(String, String)> = (0..1001)
        .map(|n| (format!("k{n}"), "v".to_string()))
        .collect();
    assert_eq!(
        unflatten(&one_over).expect_err("cap"),
        FormError::TooManyParams(1001)
    );
}
