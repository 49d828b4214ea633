// src/calculations.rs
//
// Pure derivation functions for attendance records and project financials.
// Every function is total over its numeric domain: missing or non-finite
// inputs coerce to zero, never to an error.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use rust_decimal_macros::dec;

/// Hours in a standard working day; anything beyond counts as overtime.
pub const STANDARD_DAY_HOURS: f64 = 8.0;

// Contract rate constants (currency units per hour).
const RATE_BASE_AMOUNT: Decimal = dec!(12500);
const RATE_TEAM_BOUNTY: Decimal = dec!(22500);
const RATE_NON_ENGINEER_BOUNTY: Decimal = dec!(5000);
const RATE_INCOME_HR: Decimal = dec!(110000);

pub fn weekday_name(day: NaiveDate) -> &'static str {
    match day.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// ISO week number (Thursday-anchored rule).
pub fn iso_week_number(day: NaiveDate) -> u32 {
    day.iso_week().week()
}

pub fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .ok()
}

/// Decimal hours between start and end, floored at zero. An unparseable or
/// missing endpoint yields zero hours.
pub fn working_hours(start: &str, end: &str) -> f64 {
    match (parse_time(start), parse_time(end)) {
        (Some(s), Some(e)) => {
            let minutes = e.signed_duration_since(s).num_minutes();
            (minutes.max(0) as f64) / 60.0
        }
        _ => 0.0,
    }
}

pub fn overtime_hours(working_hours: f64) -> f64 {
    (sanitize(working_hours) - STANDARD_DAY_HOURS).max(0.0)
}

/// Coerce NaN/infinite inputs to zero so downstream sums stay finite.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn money(value: f64) -> Decimal {
    Decimal::from_f64(sanitize(value)).unwrap_or_default()
}

/// Round to a whole currency unit, midpoint away from zero.
pub fn round_whole(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

pub fn base_amount(wos_hour: f64) -> i64 {
    round_whole(money(wos_hour) * RATE_BASE_AMOUNT)
}

pub fn team_bounty(wos_hour: f64) -> i64 {
    round_whole(money(wos_hour) * RATE_TEAM_BOUNTY)
}

pub fn non_engineer_bounty(non_engineer_hours: f64) -> i64 {
    round_whole(money(non_engineer_hours) * RATE_NON_ENGINEER_BOUNTY)
}

/// Real hours over planned hours as a percentage; zero when nothing was
/// planned.
pub fn hour_performance(real_hours: f64, planned_hours: f64) -> f64 {
    let planned = sanitize(planned_hours);
    if planned <= 0.0 {
        0.0
    } else {
        sanitize(real_hours) / planned * 100.0
    }
}

/// Performance-adjusted engineer payout. The bounty percentage is
/// deliberately inverted: 200 − performance, so finishing in fewer hours
/// than planned pays out less than the 100%-performance baseline, not more.
/// Falls back to the unadjusted base amount when no hours were planned.
pub fn engineer_hand(base_amount: i64, hour_performance: f64, planned_hours: f64) -> i64 {
    if sanitize(planned_hours) <= 0.0 || base_amount <= 0 {
        return base_amount;
    }
    let bounty_pct = dec!(200) - money(hour_performance);
    round_whole(Decimal::from(base_amount) * bounty_pct / dec!(100))
}

pub fn income_hr(wos_hour: f64, additional_hour: f64) -> i64 {
    round_whole((money(wos_hour) + money(additional_hour)) * RATE_INCOME_HR)
}

/// Recomputes every derived time field on an attendance record from its
/// raw day and interval. Total: missing day or times leave zeros behind.
pub fn apply_attendance_derivations(record: &mut crate::models::AttendanceRecord) {
    if let Some(day) = record.day {
        record.weekday = weekday_name(day).to_string();
        record.week = iso_week_number(day);
    } else {
        record.weekday.clear();
        record.week = 0;
    }
    record.working_hour = working_hours(&record.start_time, &record.end_time);
    record.overtime_hour = overtime_hours(record.working_hour);
}

/// Project inputs the financial derivation consumes; the hour figures come
/// from the aggregation layer, the rest from the project's static fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinanceInputs {
    pub wos_hour: f64,
    pub planned_hour: f64,
    pub real_hour: f64,
    pub non_engineer_hours: f64,
    pub additional_hour: f64,
    pub additional_value: f64,
    pub manual_expense_hr: f64,
    pub expense_hr_from_transactions: f64,
    pub expense_vehicle: f64,
    pub expense_material: f64,
    pub income_vehicle: f64,
    pub income_material: f64,
    pub expense_hse: f64,
}

/// The derived financial block. Monetary figures are whole currency units;
/// the performance ratio stays fractional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectFigures {
    pub base_amount: i64,
    pub team_bounty: i64,
    pub non_engineer_bounty: i64,
    pub hour_performance: f64,
    pub engineer_hand: i64,
    pub income_hr: i64,
    pub expense_hr_bonus: i64,
    pub profit_hr: i64,
    pub profit_vehicle: i64,
    pub profit_material: i64,
    pub total_income: i64,
    pub total_expense: i64,
    pub total_hr_expense: i64,
    pub total_profit: i64,
}

pub fn derive_project_figures(inputs: &FinanceInputs) -> ProjectFigures {
    let base_amount = base_amount(inputs.wos_hour);
    let team_bounty = team_bounty(inputs.wos_hour);
    let non_engineer_bounty = non_engineer_bounty(inputs.non_engineer_hours);
    let hour_performance = hour_performance(inputs.real_hour, inputs.planned_hour);
    let engineer_hand = engineer_hand(base_amount, hour_performance, inputs.planned_hour);
    let income_hr = income_hr(inputs.wos_hour, inputs.additional_hour);
    let expense_hr_bonus = engineer_hand + non_engineer_bounty;

    let manual_expense_hr = money(inputs.manual_expense_hr);
    let expense_from_tx = money(inputs.expense_hr_from_transactions);
    let additional_value = money(inputs.additional_value);
    let expense_vehicle = money(inputs.expense_vehicle);
    let expense_material = money(inputs.expense_material);
    let income_vehicle = money(inputs.income_vehicle);
    let income_material = money(inputs.income_material);
    let expense_hse = money(inputs.expense_hse);

    let profit_hr = round_whole(
        Decimal::from(income_hr)
            - (Decimal::from(engineer_hand)
                + Decimal::from(non_engineer_bounty)
                + expense_from_tx
                + manual_expense_hr
                + additional_value),
    );
    let profit_vehicle = round_whole(income_vehicle - expense_vehicle);
    let profit_material = round_whole(income_material - expense_material);

    let total_income = round_whole(Decimal::from(income_hr) + income_vehicle + income_material);
    let total_expense = round_whole(
        manual_expense_hr
            + expense_vehicle
            + expense_material
            + expense_hse
            + additional_value
            + expense_from_tx
            + Decimal::from(expense_hr_bonus),
    );
    let total_hr_expense = round_whole(
        Decimal::from(non_engineer_bounty)
            + Decimal::from(engineer_hand)
            + manual_expense_hr
            + expense_from_tx,
    );
    let total_profit = round_whole(
        Decimal::from(profit_hr) + Decimal::from(profit_vehicle) + Decimal::from(profit_material)
            - expense_hse,
    );

    ProjectFigures {
        base_amount,
        team_bounty,
        non_engineer_bounty,
        hour_performance,
        engineer_hand,
        income_hr,
        expense_hr_bonus,
        profit_hr,
        profit_vehicle,
        profit_material,
        total_income,
        total_expense,
        total_hr_expense,
        total_profit,
    }
}
