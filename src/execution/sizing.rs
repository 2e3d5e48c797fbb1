use crate::models::SymbolFilters;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Result of sizing a BUY against balance and exchange filters
#[derive(Debug, Clone, PartialEq)]
pub enum QuantitySizing {
    Fillable { quantity: Decimal, notional: f64 },
    /// Order would fall below the exchange minimums; nothing should be submitted
    Unfillable {
        quantity: Decimal,
        notional: f64,
        min_notional: f64,
    },
}

/// Round `quantity` down to a multiple of `step_size`
pub fn floor_to_step(quantity: Decimal, step_size: Decimal) -> Decimal {
    if step_size <= Decimal::ZERO {
        return quantity;
    }
    ((quantity / step_size).floor() * step_size).normalize()
}

/// Size a BUY: spend `allocation_fraction` of `balance` at `price`, rounded
/// down to the lot step
pub fn calculate_dynamic_quantity(
    balance: f64,
    price: f64,
    filters: &SymbolFilters,
    allocation_fraction: f64,
) -> QuantitySizing {
    let unfillable = |quantity: Decimal, notional: f64| QuantitySizing::Unfillable {
        quantity,
        notional,
        min_notional: filters.min_notional,
    };

    if !(price.is_finite() && price > 0.0 && balance.is_finite() && balance > 0.0) {
        return unfillable(Decimal::ZERO, 0.0);
    }

    let raw = match Decimal::from_f64(balance * allocation_fraction / price) {
        Some(raw) if raw > Decimal::ZERO => raw,
        _ => return unfillable(Decimal::ZERO, 0.0),
    };

    let quantity = floor_to_step(raw, filters.step_size);
    let notional = quantity.to_f64().unwrap_or(0.0) * price;

    if quantity <= Decimal::ZERO || quantity < filters.min_qty || notional < filters.min_notional {
        return unfillable(quantity, notional);
    }

    QuantitySizing::Fillable { quantity, notional }
}
