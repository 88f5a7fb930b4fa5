use rust_decimal::Decimal;

use crate::domain::product::{ConfigOption, OptionId, OptionType, OptionValue, Product, ProductId, ValueId};
use crate::domain::rule::{ConfigurationRule, RuleAction, RuleConditions, RuleId};

pub(crate) fn rule(
    id: &str,
    name: &str,
    priority: i32,
    conditions: RuleConditions,
    action: RuleAction,
) -> ConfigurationRule {
    ConfigurationRule {
        id: RuleId(id.to_owned()),
        product_id: ProductId::from("ws-pro"),
        name: name.to_owned(),
        priority,
        active: true,
        conditions,
        action,
    }
}

fn option(id: &str, option_type: OptionType, order: i32, values: &[(&str, i64, bool)]) -> ConfigOption {
    ConfigOption {
        id: OptionId::from(id),
        product_id: ProductId::from("ws-pro"),
        name: id.to_owned(),
        option_type,
        required: matches!(option_type, OptionType::Size | OptionType::Feature),
        display_order: order,
        values: values
            .iter()
            .enumerate()
            .map(|(index, (value_id, modifier, available))| OptionValue {
                id: ValueId::from(*value_id),
                config_option_id: OptionId::from(id),
                name: value_id.to_string(),
                price_modifier: Decimal::new(*modifier, 0),
                available: *available,
                display_order: index as i32,
            })
            .collect(),
    }
}

/// Base price 1000 with a handful of options whose modifiers are whole numbers.
pub(crate) fn workstation() -> Product {
    Product {
        id: ProductId::from("ws-pro"),
        name: "Workstation Pro".to_owned(),
        base_price: Decimal::new(1000, 0),
        category: "workstations".to_owned(),
        options: vec![
            option(
                "memory",
                OptionType::Size,
                0,
                &[("8GB", 0, true), ("16GB", 50, true), ("32GB", 150, true)],
            ),
            option(
                "gpu",
                OptionType::Feature,
                1,
                &[
                    ("integrated", 0, true),
                    ("RTX4070", 400, true),
                    ("RTX4080", 700, true),
                    ("RTX4090", 1200, true),
                    ("RTX4090-ti", 1500, false),
                ],
            ),
            option("color", OptionType::Color, 2, &[("silver", 0, true), ("black", 25, true)]),
            option(
                "storage",
                OptionType::Size,
                3,
                &[("512GB", 0, true), ("1TB", 80, true), ("2TB", 200, true)],
            ),
            option(
                "cooling",
                OptionType::Accessory,
                4,
                &[("air", 0, true), ("air-plus", 30, true), ("liquid", 120, true)],
            ),
            option("warranty", OptionType::Accessory, 5, &[("none", 0, true), ("3yr", 90, true)]),
        ],
    }
}
