use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::debug;

use crate::{SchedulerError, SchedulerResult};

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// CRON表达式解析和调度工具
///
/// 任务使用 5 字段的 POSIX 风格表达式（分 时 日 月 周，周字段 0 和 7 都表示周日），
/// 底层 `cron` crate 使用带秒字段的 6 字段语法，且周字段从 1（周日）开始编号。
/// 这里负责两者之间的转换：补一个 `0` 秒字段，并把数字形式的星期改写成英文缩写。
///
/// `cron` crate 对“日”和“周”两个字段取交集。传统 cron 在两个字段都受限时取并集，
/// 所以这种表达式会拆成两个调度（一个只限定日，一个只限定周），取较早的触发时间。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedules: Vec<Schedule>,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let fields = Self::fields(cron_expr)?;

        let variants = if is_restricted(&fields[2]) && is_restricted(&fields[4]) {
            let mut by_day_of_month = fields.clone();
            by_day_of_month[4] = "*".to_string();
            let mut by_day_of_week = fields;
            by_day_of_week[2] = "*".to_string();
            vec![by_day_of_month, by_day_of_week]
        } else {
            vec![fields]
        };

        let schedules = variants
            .iter()
            .map(|fields| {
                let translated = format!("0 {}", fields.join(" "));
                debug!("CRON表达式 '{}' 转换为 '{}'", cron_expr, translated);
                Schedule::from_str(&translated)
                    .map_err(|e| SchedulerError::invalid_cron(cron_expr, e))
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedules,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&from).find(|time| *time > from))
            .min()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times: Vec<DateTime<Utc>> = self
            .schedules
            .iter()
            .flat_map(|schedule| {
                schedule
                    .after(&from)
                    .filter(|time| *time > from)
                    .take(count)
            })
            .collect();
        times.sort();
        times.dedup();
        times.truncate(count);
        times
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 将 5 字段表达式转换为 `cron` crate 的 6 字段语法
    ///
    /// 日和周同时受限时，实际调度由两个拆分后的表达式组成，见 [`CronScheduler`]。
    pub fn translate(cron_expr: &str) -> SchedulerResult<String> {
        Ok(format!("0 {}", Self::fields(cron_expr)?.join(" ")))
    }

    /// 展开宏并拆分为 5 个字段，周字段已改写为 `cron` crate 的写法
    fn fields(cron_expr: &str) -> SchedulerResult<Vec<String>> {
        let trimmed = cron_expr.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_macro(trimmed).ok_or_else(|| {
                SchedulerError::invalid_cron(cron_expr, "不支持的宏")
            })?
        } else {
            trimmed
        };

        let mut fields: Vec<String> = expanded.split_whitespace().map(str::to_string).collect();
        if fields.len() != 5 {
            return Err(SchedulerError::invalid_cron(
                cron_expr,
                format!("需要 5 个字段，实际为 {} 个", fields.len()),
            ));
        }

        fields[4] = translate_day_of_week(&fields[4])
            .map_err(|message| SchedulerError::invalid_cron(cron_expr, message))?;
        Ok(fields)
    }
}

/// 以 `*` 开头或为 `?` 的日/周字段视为不受限
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

fn expand_macro(expr: &str) -> Option<&'static str> {
    match expr.to_ascii_lowercase().as_str() {
        "@hourly" => Some("0 * * * *"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@monthly" => Some("0 0 1 * *"),
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        _ => None,
    }
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    let parts = field
        .split(',')
        .map(translate_day_of_week_part)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn translate_day_of_week_part(part: &str) -> Result<String, String> {
    if part.is_empty() {
        return Err("星期字段中存在空的列表项".to_string());
    }

    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (part, None),
    };
    let with_step = |base: String| match step {
        Some(step) => format!("{base}/{step}"),
        None => base,
    };

    if base == "*" || base == "?" {
        return Ok(with_step(base.to_string()));
    }

    match base.split_once('-') {
        Some((start, end)) => {
            let start_day = day_number(start)?;
            let end_day = day_number(end)?;
            match (start_day, end_day) {
                (Some(0), Some(7)) => Ok(with_step("*".to_string())),
                (Some(start_day), Some(7)) if start_day != 7 => {
                    // 以 7（周日）结尾的区间在 1..7 编号下会回绕，拆成两段
                    if step.is_some() {
                        return Err(format!("不支持以 7 结尾且带步长的星期区间: '{part}'"));
                    }
                    if start_day == 6 {
                        return Ok("SAT,SUN".to_string());
                    }
                    Ok(format!("{}-SAT,SUN", DAY_NAMES[start_day]))
                }
                _ => Ok(with_step(format!(
                    "{}-{}",
                    day_name(start, start_day),
                    day_name(end, end_day)
                ))),
            }
        }
        None => {
            let day = day_number(base)?;
            Ok(with_step(day_name(base, day)))
        }
    }
}

/// 数字形式返回 `Some(0..=7)`；英文名称返回 `None`，原样交给 `cron` crate 解析
fn day_number(token: &str) -> Result<Option<usize>, String> {
    if token.is_empty() {
        return Err("星期字段中存在空值".to_string());
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        let day: usize = token
            .parse()
            .map_err(|_| format!("无效的星期值: '{token}'"))?;
        if day > 7 {
            return Err(format!("星期值超出范围 0-7: '{token}'"));
        }
        return Ok(Some(day));
    }
    Ok(None)
}

fn day_name(token: &str, day: Option<usize>) -> String {
    match day {
        Some(day) => DAY_NAMES[day].to_string(),
        None => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_translate_fields() {
        assert_eq!(CronScheduler::translate("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(CronScheduler::translate("0 3 * * 0").unwrap(), "0 0 3 * * SUN");
        assert_eq!(CronScheduler::translate("0 3 * * 7").unwrap(), "0 0 3 * * SUN");
        assert_eq!(
            CronScheduler::translate("30 8 * * 1-5").unwrap(),
            "0 30 8 * * MON-FRI"
        );
        assert_eq!(
            CronScheduler::translate("0 0 * * 5-7").unwrap(),
            "0 0 0 * * FRI-SAT,SUN"
        );
        assert_eq!(CronScheduler::translate("0 0 * * 0-7").unwrap(), "0 0 0 * * *");
        assert_eq!(
            CronScheduler::translate("0 0 * * mon,3").unwrap(),
            "0 0 0 * * mon,WED"
        );
        assert_eq!(CronScheduler::translate("@daily").unwrap(), "0 0 0 * * *");
        assert_eq!(CronScheduler::translate("@weekly").unwrap(), "0 0 0 * * SUN");
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "* * * *",
            "0 0 0 * * *",
            "61 * * * *",
            "* * * * 8",
            "* * * * 1-7/2",
            "@reboot",
            "every minute",
        ] {
            assert!(
                matches!(
                    CronScheduler::new(expr),
                    Err(SchedulerError::InvalidCron { .. })
                ),
                "表达式 '{expr}' 应当被拒绝"
            );
        }
    }

    #[test]
    fn test_next_after_completion_time() {
        let cron = CronScheduler::new("*/5 * * * *").unwrap();
        let finished = utc(2024, 5, 1, 10, 2, 0);
        assert_eq!(cron.next_execution_time(finished), Some(utc(2024, 5, 1, 10, 5, 0)));
    }

    #[test]
    fn test_next_is_strictly_after() {
        let cron = CronScheduler::new("*/5 * * * *").unwrap();
        let on_tick = utc(2024, 5, 1, 10, 5, 0);
        assert_eq!(cron.next_execution_time(on_tick), Some(utc(2024, 5, 1, 10, 10, 0)));
    }

    #[test]
    fn test_day_of_week_numbering() {
        // 2024-05-01 是周三
        let from = utc(2024, 5, 1, 12, 0, 0);

        let sunday = CronScheduler::new("0 3 * * 0").unwrap();
        let next = sunday.next_execution_time(from).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 3);

        let weekdays = CronScheduler::new("0 9 * * 1-5").unwrap();
        let upcoming = weekdays.upcoming_times(from, 5);
        assert_eq!(upcoming.len(), 5);
        assert!(upcoming
            .iter()
            .all(|t| !matches!(t.weekday(), Weekday::Sat | Weekday::Sun)));

        let weekend = CronScheduler::new("0 9 * * 6-7").unwrap();
        let days: Vec<Weekday> = weekend
            .upcoming_times(from, 2)
            .iter()
            .map(|t| t.weekday())
            .collect();
        assert_eq!(days, vec![Weekday::Sat, Weekday::Sun]);
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 每月 1 日或每周一
        let cron = CronScheduler::new("0 0 1 * 1").unwrap();
        let from = utc(2024, 5, 1, 12, 0, 0);
        assert_eq!(cron.next_execution_time(from), Some(utc(2024, 5, 6, 0, 0, 0)));
        assert_eq!(
            cron.upcoming_times(from, 5),
            vec![
                utc(2024, 5, 6, 0, 0, 0),
                utc(2024, 5, 13, 0, 0, 0),
                utc(2024, 5, 20, 0, 0, 0),
                utc(2024, 5, 27, 0, 0, 0),
                utc(2024, 6, 1, 0, 0, 0),
            ]
        );

        // 2024-07-01 同时满足两个条件，只出现一次
        let times = cron.upcoming_times(utc(2024, 6, 30, 0, 0, 0), 2);
        assert_eq!(times, vec![utc(2024, 7, 1, 0, 0, 0), utc(2024, 7, 8, 0, 0, 0)]);
    }

    #[test]
    fn test_single_day_field_is_unchanged() {
        let from = utc(2024, 5, 1, 12, 0, 0);

        let monthly = CronScheduler::new("0 0 1 * *").unwrap();
        assert_eq!(monthly.next_execution_time(from), Some(utc(2024, 6, 1, 0, 0, 0)));

        let mondays = CronScheduler::new("0 0 * * 1").unwrap();
        assert_eq!(mondays.next_execution_time(from), Some(utc(2024, 5, 6, 0, 0, 0)));
    }

    #[test]
    fn test_hourly_macro() {
        let cron = CronScheduler::new("@hourly").unwrap();
        assert_eq!(
            cron.next_execution_time(utc(2024, 5, 1, 10, 2, 0)),
            Some(utc(2024, 5, 1, 11, 0, 0))
        );
    }
}
