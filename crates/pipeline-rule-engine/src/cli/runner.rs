//! 命令执行器
//!
//! 负责执行各 CLI 子命令的具体逻辑。
//! 将命令行参数转化为规则解析、批量评分和结果输出。

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use pipeline_shared::config::AppConfig;

use crate::deal::{Deal, EvaluationContext};
use crate::engine::{AnalysisResult, BusinessRulesEngine, GroupBy, RulesSummary};
use crate::loader::RuleCatalog;
use crate::metadata::{RuleMetadata, well_known_fields};
use crate::models::{DealViolation, Rule};
use crate::operators::parse_datetime;
use crate::resolver::{GlobalRuleStatus, ResolutionContext, RuleResolver};
use crate::store::InMemoryRuleRepository;
use crate::validation::RuleValidator;

use super::commands::RuleSourceArgs;

/// analyze 命令输出
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub analyzed_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub group_by: String,
    pub rules: RulesSummary,
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub remediation_plan: BTreeMap<String, Vec<DealViolation>>,
}

/// rules 命令输出
#[derive(Debug, Serialize)]
struct RulesReport {
    summary: RulesSummary,
    global_rules: Vec<GlobalRuleStatus>,
}

/// 命令执行器
///
/// 持有加载好的应用配置，命令行参数优先于配置项。
pub struct CommandRunner {
    config: AppConfig,
}

impl CommandRunner {
    /// 创建命令执行器
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// 执行 analyze 命令
    pub async fn run_analyze(
        &self,
        deals_path: &Path,
        source: &RuleSourceArgs,
        group_by: GroupBy,
        chunk_size: Option<usize>,
        at: Option<&str>,
        output: Option<&Path>,
    ) -> Result<()> {
        let now = match at {
            Some(s) => parse_datetime(s).with_context(|| format!("无法解析评估时间: {}", s))?,
            None => Utc::now(),
        };
        let chunk_size = chunk_size.unwrap_or(self.config.engine.chunk_size);

        let ctx = resolution_context(source);
        let resolver = self.build_resolver(source)?;
        let engine = BusinessRulesEngine::for_context(&resolver, &ctx)
            .await
            .context("构建规则引擎失败")?;

        let deals = load_deals(deals_path)?;
        info!(
            deals = deals.len(),
            rules = engine.rules().len(),
            chunk_size,
            "开始分析商机"
        );

        let result = analyze_in_chunks(&engine, deals, chunk_size, now).await?;
        let remediation_plan = BusinessRulesEngine::get_remediation_plan(&result.violations, group_by);

        let report = AnalysisReport {
            analyzed_at: now,
            user_id: ctx.user_id.clone(),
            org_id: ctx.org_id.clone(),
            group_by: group_by.to_string(),
            rules: engine.get_rules_summary(),
            result,
            remediation_plan,
        };

        info!(
            health_score = report.result.health_score,
            health_status = ?report.result.health_status,
            deals_with_issues = report.result.deals_with_issues,
            "分析完成"
        );

        write_json(&report, output)
    }

    /// 执行 rules 命令
    pub async fn run_rules(&self, source: &RuleSourceArgs) -> Result<()> {
        let ctx = resolution_context(source);
        let resolver = self.build_resolver(source)?;

        let engine = BusinessRulesEngine::for_context(&resolver, &ctx)
            .await
            .context("解析有效规则失败")?;
        let global_rules = resolver
            .global_rule_status(&ctx)
            .await
            .context("获取全局规则状态失败")?;

        let report = RulesReport {
            summary: engine.get_rules_summary(),
            global_rules,
        };
        write_json(&report, None)
    }

    /// 执行 validate 命令
    ///
    /// 规则目录有任何配置错误时返回错误，进程以非零状态退出。
    pub fn run_validate(&self, rules_path: &Path) -> Result<()> {
        let catalog = match RuleCatalog::from_path(rules_path) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(code = e.code(), "规则目录校验失败: {}", e);
                bail!("规则目录 {} 无效: {}", rules_path.display(), e);
            }
        };

        if catalog.is_empty() {
            warn!("规则目录为空: {}", rules_path.display());
        }

        let rules = catalog.into_rules();
        let unknown = unknown_fields(&rules);
        for field in &unknown {
            warn!(field = %field, "规则引用了未登记的字段");
        }

        let engine = BusinessRulesEngine::new(rules)?;
        let summary = engine.get_rules_summary();

        println!("✅ 规则目录有效: {}", rules_path.display());
        println!("   规则总数: {}", summary.total_rules);
        for (category, count) in &summary.by_category {
            println!("   {:<16} {}", category.as_str(), count);
        }
        if !unknown.is_empty() {
            let fields: Vec<_> = unknown.into_iter().collect();
            println!("   未登记字段: {}", fields.join(", "));
        }
        Ok(())
    }

    /// 执行 metadata 命令
    pub fn run_metadata(&self) -> Result<()> {
        write_json(&RuleMetadata::build(), None)
    }

    fn build_resolver(&self, source: &RuleSourceArgs) -> Result<RuleResolver> {
        let rules_path = source
            .rules
            .clone()
            .or_else(|| self.config.engine.rules_path.clone());
        let rules = RuleCatalog::load(rules_path.as_deref())
            .context("加载规则目录失败")?
            .into_rules();

        let sources_path: Option<PathBuf> = source
            .sources
            .clone()
            .or_else(|| self.config.engine.sources_path.clone());
        let repository = match sources_path {
            Some(path) => InMemoryRuleRepository::from_path(&path, &rules)
                .with_context(|| format!("加载规则来源快照失败: {}", path.display()))?,
            None => InMemoryRuleRepository::new(),
        };

        Ok(RuleResolver::new(rules, Arc::new(repository)))
    }
}

/// 规则条件引用、但不在常用字段元数据中的字段
///
/// 商机是开放字段集合，这类字段不算错误，只提示可能的拼写问题。
fn unknown_fields(rules: &[Rule]) -> BTreeSet<String> {
    let known: BTreeSet<&str> = well_known_fields().iter().map(|f| f.name).collect();
    rules
        .iter()
        .flat_map(RuleValidator::referenced_fields)
        .filter(|field| !known.contains(field.as_str()))
        .collect()
}

fn resolution_context(source: &RuleSourceArgs) -> ResolutionContext {
    ResolutionContext::new(source.user_id.clone(), source.org_id.clone())
}

/// 分片并行评估后单线程聚合
///
/// 每个分片在阻塞线程池上评估，所有分片共享同一个评估时间点。
/// 按分片顺序收集结果，输出顺序与输入一致。
pub async fn analyze_in_chunks(
    engine: &BusinessRulesEngine,
    deals: Vec<Deal>,
    chunk_size: usize,
    now: DateTime<Utc>,
) -> Result<AnalysisResult> {
    let start = Instant::now();
    let ctx = EvaluationContext::new(now);
    let chunk_size = chunk_size.max(1);

    let mut handles = Vec::with_capacity(deals.len().div_ceil(chunk_size));
    for chunk in deals.chunks(chunk_size) {
        let engine = engine.clone();
        let chunk = chunk.to_vec();
        handles.push(tokio::task::spawn_blocking(move || {
            engine.evaluate_deals(&chunk, &ctx)
        }));
    }

    let mut evaluations = Vec::with_capacity(deals.len());
    for handle in handles {
        evaluations.extend(handle.await.context("评估分片任务失败")?);
    }

    let result = BusinessRulesEngine::aggregate(evaluations);
    metrics::histogram!("rule_engine_analysis_duration_seconds")
        .record(start.elapsed().as_secs_f64());
    Ok(result)
}

/// 读取商机数据文件
///
/// `.yaml` / `.yml` 按 YAML 解析，其余按 JSON 数组解析。
pub fn load_deals(path: &Path) -> Result<Vec<Deal>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("读取商机文件失败: {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let deals: Vec<Deal> = if is_yaml {
        serde_yaml::from_str(&content).context("解析 YAML 商机数据失败")?
    } else {
        serde_json::from_str(&content).context("解析 JSON 商机数据失败")?
    };

    info!("已读取 {} 条商机: {}", deals.len(), path.display());
    Ok(deals)
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    match output {
        Some(path) => {
            let mut file = fs::File::create(path)
                .with_context(|| format!("创建输出文件失败: {}", path.display()))?;
            writeln!(file, "{}", json)?;
            info!("结果已写入 {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
