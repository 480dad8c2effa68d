use std::collections::BTreeSet;

use bond_quant::trading::factorcat::TargetInstrument;
use bond_quant::trading::services::rebalance_service::{
    calc_buy_volume, compute_rebalance_plan, LOT_SIZE,
};
use bond_quant::trading::services::refill_service::{pick_refill_candidates, StopReason};
use bond_quant::trading::services::risk_service::evaluate_stop;

fn set(codes: &[&str]) -> BTreeSet<String> {
    codes.iter().map(|s| s.to_string()).collect()
}

fn bonds(codes: &[&str]) -> Vec<TargetInstrument> {
    codes
        .iter()
        .map(|code| TargetInstrument {
            code: code.to_string(),
            name: String::new(),
            price: None,
            trade_date: None,
        })
        .collect()
}

#[test]
fn scenario_ledger_subset_protects_foreign_positions() {
    // 目标 {A,B,C}，账本 {A,X}，券商持仓 {A,X,Y}
    let (to_sell, to_buy) =
        compute_rebalance_plan(&set(&["A", "B", "C"]), &set(&["A", "X", "Y"]), &set(&["A", "X"]));

    // 只卖 X：A 在目标中保留，Y 非本系统买入不触碰
    assert_eq!(to_sell, vec!["X".to_string()]);
    assert_eq!(to_buy, vec!["B".to_string(), "C".to_string()]);

    // to_sell 永远是账本代码的子集
    for code in &to_sell {
        assert!(set(&["A", "X"]).contains(code));
    }
}

#[test]
fn scenario_empty_ledger_never_sells() {
    let (to_sell, to_buy) =
        compute_rebalance_plan(&set(&["A"]), &set(&["X", "Y"]), &set(&[]));
    assert!(to_sell.is_empty());
    assert_eq!(to_buy, vec!["A".to_string()]);
}

#[test]
fn scenario_buy_volume_lot_flooring() {
    // 固定金额 10000 元、价格 105.3、一手 10 张 -> 90 张
    assert_eq!(calc_buy_volume(10000.0, 105.3), 90);
    // 另一组常规值
    assert_eq!(calc_buy_volume(20000.0, 99.5), 200);
    // 金额不足一手
    assert_eq!(calc_buy_volume(1000.0, 105.3), 0);
    // 价格非法时不会产生委托量
    assert_eq!(calc_buy_volume(10000.0, 0.0), 0);
    assert_eq!(calc_buy_volume(10000.0, -5.0), 0);
    // 结果恒为整手
    for amount in [5000.0, 12345.6, 99999.9] {
        for price in [98.7, 105.3, 130.01] {
            assert_eq!(calc_buy_volume(amount, price) % LOT_SIZE, 0);
        }
    }
}

#[test]
fn scenario_stop_boundaries() {
    // 边界相等即触发：涨幅 == 止盈比例
    assert_eq!(evaluate_stop(0.10, 0.10, 0.05), Some(StopReason::StopProfit));
    // 跌幅 == 止损比例
    assert_eq!(evaluate_stop(-0.05, 0.10, 0.05), Some(StopReason::StopLoss));
    // 区间内不触发
    assert_eq!(evaluate_stop(0.0, 0.10, 0.05), None);
    assert_eq!(evaluate_stop(0.0999, 0.10, 0.05), None);
    assert_eq!(evaluate_stop(-0.0499, 0.10, 0.05), None);
}

#[test]
fn scenario_refill_candidates_rank_order_first_n() {
    // 选债列表顺序即补仓优先级
    let targets = bonds(&["E", "A", "D", "B", "C"]);
    let held = set(&["A", "C"]);
    let sold = set(&[]);

    let picked = pick_refill_candidates(&targets, &held, &sold, 2);
    let codes: Vec<&str> = picked.iter().map(|b| b.code.as_str()).collect();
    assert_eq!(codes, vec!["E", "D"]);
}

#[test]
fn scenario_refill_treats_just_sold_as_not_held() {
    // 刚卖出的 E 还挂在券商持仓里，应视为未持有、可补回
    let targets = bonds(&["E", "D"]);
    let held = set(&["E"]);
    let sold = set(&["E"]);

    let picked = pick_refill_candidates(&targets, &held, &sold, 1);
    assert_eq!(picked[0].code, "E");
}

#[test]
fn scenario_refill_count_matches_queue_size_not_value() {
    // 一比一按笔数补仓，与卖出金额无关
    let targets = bonds(&["A", "B", "C", "D"]);
    let picked = pick_refill_candidates(&targets, &set(&[]), &set(&[]), 3);
    assert_eq!(picked.len(), 3);

    // 候选不足时取全部
    let picked = pick_refill_candidates(&targets, &set(&["A", "B", "C"]), &set(&[]), 3);
    assert_eq!(picked.len(), 1);
}
