use super::ui;
use crate::core::model::{Fund, FundId, Investment, Strategy};
use crate::store::FundStore;
use crate::store::filter::{FundFilter, InvestmentFilter, InvestmentSortKey, Sort};
use anyhow::Result;
use comfy_table::Cell;
use rust_decimal::Decimal;

pub async fn funds(store: &dyn FundStore, strategy: Option<Strategy>) -> Result<Vec<Fund>> {
    let filter = FundFilter {
        strategy,
        ..Default::default()
    };
    let funds = store.list_funds(&filter).await?;
    if funds.is_empty() {
        println!("No funds to display.");
        return Ok(funds);
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Fund"),
        ui::header_cell("Id"),
        ui::header_cell("Strategy"),
        ui::header_cell("Manager"),
        ui::header_cell("AUM"),
        ui::header_cell("Performance (%)"),
    ]);
    for fund in &funds {
        table.add_row(vec![
            Cell::new(&fund.name),
            Cell::new(ui::style_text(fund.fund_id.as_str(), ui::StyleType::Subtle)),
            Cell::new(fund.strategy),
            ui::format_optional_cell(fund.manager_name.as_deref(), str::to_string),
            ui::decimal_cell(fund.aum),
            ui::format_optional_cell(fund.performance, |p| format!("{p:.2}")),
        ]);
    }
    let total = format_total(funds.iter().map(|f| f.aum));

    println!("\n{}\n", ui::style_text("Funds", ui::StyleType::Title));
    println!("{table}");
    println!(
        "\n{}: {}\n",
        ui::style_text("Total AUM", ui::StyleType::TotalLabel),
        ui::style_text(&total, ui::StyleType::TotalValue)
    );
    Ok(funds)
}

/// Lists investments, most recent first.
pub async fn investments(store: &dyn FundStore, fund_id: Option<FundId>) -> Result<Vec<Investment>> {
    let filter = InvestmentFilter {
        fund_id,
        sort: Some(Sort::desc(InvestmentSortKey::InvestedAt)),
        ..Default::default()
    };
    let investments = store.list_investments(&filter).await?;
    if investments.is_empty() {
        println!("No investments to display.");
        return Ok(investments);
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Investor"),
        ui::header_cell("Fund"),
        ui::header_cell("Invested On"),
        ui::header_cell("Amount"),
    ]);
    for investment in &investments {
        table.add_row(vec![
            Cell::new(&investment.investor_name),
            Cell::new(ui::style_text(
                investment.fund_id.as_str(),
                ui::StyleType::Subtle,
            )),
            Cell::new(investment.invested_at),
            ui::decimal_cell(investment.amount),
        ]);
    }
    let total = format_total(investments.iter().map(|i| i.amount));

    println!("\n{}\n", ui::style_text("Investments", ui::StyleType::Title));
    println!("{table}");
    println!(
        "\n{}: {}\n",
        ui::style_text("Total Invested", ui::StyleType::TotalLabel),
        ui::style_text(&total, ui::StyleType::TotalValue)
    );
    Ok(investments)
}

fn format_total(mut values: impl Iterator<Item = Decimal>) -> String {
    values
        .try_fold(Decimal::ZERO, |total, value| total.checked_add(value))
        .map_or_else(|| "out of range".to_string(), |total| total.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_that_overflows_is_reported_not_panicked() {
        let values = [Decimal::MAX, Decimal::ONE];
        assert_eq!(format_total(values.into_iter()), "out of range");
        let values = [Decimal::new(105, 1), Decimal::TWO];
        assert_eq!(format_total(values.into_iter()), "12.5");
    }
}
