use crate::export::ExportTable;
use crate::models::{is_missing, row_number, row_text, EntityKind, Row, Table};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

const STAGE: &str = "VL_FILTRO_ETAPA";
const DISCIPLINE: &str = "VL_FILTRO_DISCIPLINA";
const NETWORK: &str = "VL_FILTRO_REDE";

/// Writing assessment reported alongside reading; left out of participation and proficiency.
const WRITTEN_PORTUGUESE: &str = "Língua Portuguesa - Escrita e Leitura";

const EXCLUDED_STAGES: &[&str] = &[
    "ENSINO MEDIO - 2ª SERIE",
    "ENSINO MEDIO - 3ª SERIE",
    "EJA DO ENSINO MÉDIO - 3ª SÉRIE",
];

const PREFERRED_DISCIPLINES: &[&str] = &["Língua Portuguesa", WRITTEN_PORTUGUESE];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub stage: Option<String>,
    pub discipline: Option<String>,
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} {:?} is not available; options: {}", .label, .requested, .options.join(", "))]
pub struct UnknownOption {
    pub label: &'static str,
    pub requested: String,
    pub options: Vec<String>,
}

/// State-level roots only show the state's own rows.
pub fn restrict_to_state(table: &mut Table, root: &str) {
    if root.len() == 2 && table.has_column("CD_ENTIDADE") {
        table.retain(|row| row_text(row, "CD_ENTIDADE").as_deref() == Some(root));
    }
}

/// Narrow the table to one stage, one discipline and one network, in that
/// order. Unset choices fall back to each selector's default. Returns what
/// was actually applied.
pub fn apply_filters(table: &mut Table, requested: &Selection) -> Result<Selection, UnknownOption> {
    let stage = select(table, STAGE, "Etapa", requested.stage.as_deref(), EXCLUDED_STAGES, &[])?;
    let discipline = select(
        table,
        DISCIPLINE,
        "Disciplina",
        requested.discipline.as_deref(),
        &[],
        PREFERRED_DISCIPLINES,
    )?;
    let network = select(table, NETWORK, "Rede", requested.network.as_deref(), &[], &[])?;
    Ok(Selection {
        stage,
        discipline,
        network,
    })
}

fn select(
    table: &mut Table,
    column: &str,
    label: &'static str,
    requested: Option<&str>,
    excluded: &[&str],
    preferred: &[&str],
) -> Result<Option<String>, UnknownOption> {
    let options: Vec<String> = if table.has_column(column) {
        table
            .distinct_texts(column)
            .into_iter()
            .filter(|option| !excluded.contains(&option.as_str()))
            .collect()
    } else {
        Vec::new()
    };
    if options.is_empty() {
        // Nothing to choose from: an explicit request cannot be honoured.
        return match requested {
            Some(value) => Err(UnknownOption {
                label,
                requested: value.to_string(),
                options,
            }),
            None => Ok(None),
        };
    }

    let chosen = match requested {
        Some(value) if options.iter().any(|o| o == value) => value.to_string(),
        Some(value) => {
            return Err(UnknownOption {
                label,
                requested: value.to_string(),
                options,
            })
        }
        None => preferred
            .iter()
            .find(|p| options.iter().any(|o| o == *p))
            .map(|p| p.to_string())
            .unwrap_or_else(|| options[0].clone()),
    };

    table.retain(|row| row_text(row, column).as_deref() == Some(chosen.as_str()));
    Ok(Some(chosen))
}

/// Outcome of building one view.
#[derive(Debug, Clone, PartialEq)]
pub enum Section<T> {
    Ready(T),
    MissingColumns,
    NoRows,
}

impl<T> Section<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Section::Ready(view) => Some(view),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

fn number_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn complete<'a>(table: &'a Table, columns: &'a [&'a str]) -> impl Iterator<Item = &'a Row> + 'a {
    table
        .rows
        .iter()
        .filter(move |row| columns.iter().all(|c| !is_missing(row.get(*c))))
}

fn is_written_portuguese(row: &Row) -> bool {
    row_text(row, DISCIPLINE).as_deref() == Some(WRITTEN_PORTUGUESE)
}

/// Copy `columns` of each row under `headers`, coercing `numeric` columns.
fn project(rows: &[&Row], columns: &[&str], headers: &[String], numeric: &[&str]) -> ExportTable {
    let mut export = ExportTable::new(headers.to_vec());
    for row in rows {
        export.rows.push(
            columns
                .iter()
                .map(|column| {
                    if numeric.contains(column) {
                        number_value(row_number(row, column))
                    } else {
                        row.get(*column).cloned().unwrap_or(Value::Null)
                    }
                })
                .collect(),
        );
    }
    export
}

fn headers(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

/// Entity kind from `TP_ENTIDADE`, falling back to the type description.
fn resolve_kind(row: &Row) -> Option<EntityKind> {
    EntityKind::of_row(row).or_else(|| {
        match row_text(row, "DC_TIPO_ENTIDADE")?.trim() {
            "Estado" | "Ceará" => Some(EntityKind::State),
            "Regional" | "CREDE" => Some(EntityKind::Regional),
            "Município" => Some(EntityKind::Municipality),
            "Escola" => Some(EntityKind::School),
            _ => None,
        }
    })
}

// ----- Participation -----

pub const PARTICIPATION_FILE: &str = "participacao.csv";

const PARTICIPATION_COLUMNS: [&str; 7] = [
    "TP_ENTIDADE",
    "NM_ENTIDADE",
    "QT_ALUNO_PREVISTO",
    "QT_ALUNO_EFETIVO",
    "TX_PARTICIPACAO",
    DISCIPLINE,
    STAGE,
];

const PARTICIPATION_HEADERS: [&str; 7] = [
    "Tipo de Entidade",
    "Entidade",
    "Alunos Previstos",
    "Alunos Efetivos",
    "Participação",
    "Componente Curricular",
    "Etapa",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipationGauge {
    pub kind: EntityKind,
    pub entity: String,
    pub participation: f64,
    pub expected: Option<f64>,
    pub effective: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipationView {
    pub table: ExportTable,
    /// Highest participation row per entity kind.
    pub gauges: Vec<ParticipationGauge>,
}

pub fn participation(table: &Table) -> Section<ParticipationView> {
    if table.is_empty() || !table.has_columns(&PARTICIPATION_COLUMNS) {
        return Section::MissingColumns;
    }
    let rows: Vec<&Row> = complete(table, &PARTICIPATION_COLUMNS)
        .filter(|row| !is_written_portuguese(row))
        .collect();
    if rows.is_empty() {
        return Section::NoRows;
    }

    let numeric = ["QT_ALUNO_PREVISTO", "QT_ALUNO_EFETIVO", "TX_PARTICIPACAO"];
    let export = project(&rows, &PARTICIPATION_COLUMNS, &headers(&PARTICIPATION_HEADERS), &numeric);

    let mut gauges = Vec::new();
    for kind in EntityKind::ALL {
        let mut best: Option<(&Row, f64)> = None;
        for row in rows.iter().filter(|r| EntityKind::of_row(r) == Some(kind)) {
            if let Some(rate) = row_number(row, "TX_PARTICIPACAO") {
                if best.map_or(true, |(_, top)| rate > top) {
                    best = Some((*row, rate));
                }
            }
        }
        if let Some((row, participation)) = best {
            gauges.push(ParticipationGauge {
                kind,
                entity: row_text(row, "NM_ENTIDADE").unwrap_or_default(),
                participation,
                expected: row_number(row, "QT_ALUNO_PREVISTO"),
                effective: row_number(row, "QT_ALUNO_EFETIVO"),
            });
        }
    }

    Section::Ready(ParticipationView {
        table: export,
        gauges,
    })
}

// ----- Proficiency -----

pub const PROFICIENCY_FILE: &str = "proficiencia.csv";

const PROFICIENCY_COLUMNS: [&str; 5] = [
    "TP_ENTIDADE",
    "NM_ENTIDADE",
    "AVG_PROFICIENCIA_E1",
    DISCIPLINE,
    STAGE,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ProficiencyView {
    pub table: ExportTable,
    /// Mean proficiency for every entity kind, `None` when the kind has no rows.
    pub means: Vec<(EntityKind, Option<f64>)>,
}

pub fn proficiency(table: &Table) -> Section<ProficiencyView> {
    if table.is_empty() || !table.has_columns(&PROFICIENCY_COLUMNS) {
        return Section::MissingColumns;
    }
    let rows: Vec<&Row> = complete(table, &PROFICIENCY_COLUMNS)
        .filter(|row| !is_written_portuguese(row))
        .collect();

    let export = project(
        &rows,
        &PROFICIENCY_COLUMNS[1..],
        &headers(&["Entidade", "Proficiência Média", "Componente Curricular", "Etapa"]),
        &["AVG_PROFICIENCIA_E1"],
    );

    let means = EntityKind::ALL
        .into_iter()
        .map(|kind| {
            let mut mean = Mean::default();
            for row in rows.iter().filter(|r| EntityKind::of_row(r) == Some(kind)) {
                mean.push(row_number(row, "AVG_PROFICIENCIA_E1"));
            }
            (kind, mean.value())
        })
        .collect();

    Section::Ready(ProficiencyView {
        table: export,
        means,
    })
}

// ----- Performance tiers -----

pub const PERFORMANCE_FILE: &str = "desempenho.csv";

const TIER_COUNTS: [&str; 5] = [
    "NU_N01_TRI_E1",
    "NU_N02_TRI_E1",
    "NU_N03_TRI_E1",
    "NU_N04_TRI_E1",
    "NU_N05_TRI_E1",
];

const TIER_RATES: [&str; 5] = [
    "TX_N01_TRI_E1",
    "TX_N02_TRI_E1",
    "TX_N03_TRI_E1",
    "TX_N04_TRI_E1",
    "TX_N05_TRI_E1",
];

const PERFORMANCE_IDS: [&str; 5] = ["TP_ENTIDADE", "DC_TIPO_ENTIDADE", "NM_ENTIDADE", DISCIPLINE, STAGE];

#[derive(Debug, Clone, PartialEq)]
pub struct TierDistribution {
    pub kind: EntityKind,
    pub description: String,
    /// Mean share of students per tier.
    pub rates: [Option<f64>; 5],
    /// Total students per tier.
    pub counts: [f64; 5],
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceView {
    pub table: ExportTable,
    pub distribution: Vec<TierDistribution>,
}

fn performance_columns() -> Vec<&'static str> {
    let mut columns = vec!["TP_ENTIDADE", "DC_TIPO_ENTIDADE", "NM_ENTIDADE"];
    columns.extend(TIER_COUNTS);
    columns.extend(TIER_RATES);
    columns.extend([DISCIPLINE, STAGE]);
    columns
}

pub fn performance(table: &Table) -> Section<PerformanceView> {
    let columns = performance_columns();
    if table.is_empty() || !table.has_columns(&columns) {
        return Section::MissingColumns;
    }

    let mut rows: Vec<&Row> = complete(table, &PERFORMANCE_IDS).collect();
    if rows.is_empty() {
        return Section::NoRows;
    }
    // Known kinds in display order, unknown kinds last.
    rows.sort_by(|a, b| {
        let rank = |row: &Row| EntityKind::of_row(row).map_or(EntityKind::ALL.len(), |k| k as usize);
        rank(*a)
            .cmp(&rank(*b))
            .then_with(|| row_text(a, "NM_ENTIDADE").cmp(&row_text(b, "NM_ENTIDADE")))
    });

    let mut header_labels = vec![
        "Tipo de Entidade".to_string(),
        "Tipo de Entidade Descrição".to_string(),
        "Entidade".to_string(),
    ];
    header_labels.extend((1..=5).map(|n| format!("Nível {}", n)));
    header_labels.extend((1..=5).map(|n| format!("Taxa Nível {}", n)));
    header_labels.extend(["Componente Curricular".to_string(), "Etapa".to_string()]);

    let numeric: Vec<&str> = TIER_COUNTS.iter().chain(TIER_RATES.iter()).copied().collect();
    let export = project(&rows, &columns, &header_labels, &numeric);

    let mut groups: BTreeMap<(EntityKind, String), ([Mean; 5], [f64; 5])> = BTreeMap::new();
    for row in &rows {
        let Some(kind) = EntityKind::of_row(row) else {
            continue;
        };
        let description = row_text(row, "DC_TIPO_ENTIDADE").unwrap_or_default();
        let (rates, counts) = groups.entry((kind, description)).or_default();
        for tier in 0..5 {
            rates[tier].push(row_number(row, TIER_RATES[tier]));
            counts[tier] += row_number(row, TIER_COUNTS[tier]).unwrap_or(0.0);
        }
    }

    let distribution = groups
        .into_iter()
        .map(|((kind, description), (rates, counts))| TierDistribution {
            kind,
            description,
            rates: rates.map(|m| m.value()),
            counts,
        })
        .collect();

    Section::Ready(PerformanceView {
        table: export,
        distribution,
    })
}

// ----- Skill accuracy -----

pub const SKILLS_FILE: &str = "habilidade.csv";

const SKILL_COLUMNS: [&str; 8] = [
    "TP_ENTIDADE",
    "DC_TIPO_ENTIDADE",
    "NM_ENTIDADE",
    DISCIPLINE,
    STAGE,
    "TX_ACERTO",
    "DC_HABILIDADE",
    "CD_HABILIDADE_MODELO_02",
];

const SKILL_HEADERS: [&str; 8] = [
    "Tipo de Entidade Código",
    "Tipo de Entidade",
    "Entidade",
    "Componente Curricular",
    "Etapa",
    "Taxa de Acerto",
    "Habilidade",
    "Código Habilidade",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SkillAccuracy {
    pub kind: EntityKind,
    pub code: String,
    pub description: String,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkillView {
    pub table: ExportTable,
    /// Mean accuracy per kind and skill, ordered by kind then skill code.
    pub accuracy: Vec<SkillAccuracy>,
}

pub fn skills(table: &Table) -> Section<SkillView> {
    if table.is_empty() || !table.has_columns(&SKILL_COLUMNS) {
        return Section::MissingColumns;
    }

    let rows: Vec<&Row> = table.rows.iter().collect();
    let export = project(&rows, &SKILL_COLUMNS, &headers(&SKILL_HEADERS), &["TX_ACERTO"]);

    let mut groups: BTreeMap<(EntityKind, String, String), Mean> = BTreeMap::new();
    for row in rows {
        let (Some(kind), Some(accuracy), Some(code), Some(description)) = (
            resolve_kind(row),
            row_number(row, "TX_ACERTO"),
            row_text(row, "CD_HABILIDADE_MODELO_02"),
            row_text(row, "DC_HABILIDADE"),
        ) else {
            continue;
        };
        groups
            .entry((kind, code, description))
            .or_default()
            .push(Some(accuracy));
    }

    let accuracy = groups
        .into_iter()
        .filter_map(|((kind, code, description), mean)| {
            Some(SkillAccuracy {
                kind,
                code,
                description,
                accuracy: mean.value()?,
            })
        })
        .collect();

    Section::Ready(SkillView {
        table: export,
        accuracy,
    })
}

// ----- Demographic breakdowns -----

pub struct DemographicGroup {
    pub key: &'static str,
    pub label: &'static str,
    pub proficiency_header: &'static str,
}

pub struct Demographic {
    pub title: &'static str,
    pub file_name: &'static str,
    pub groups: &'static [DemographicGroup],
}

pub const ETHNICITY: Demographic = Demographic {
    title: "Proficiência por etnia",
    file_name: "proficiencia_etnia.csv",
    groups: &[
        DemographicGroup { key: "PRETA", label: "Preta", proficiency_header: "Proficiência Preta" },
        DemographicGroup { key: "BRANCA", label: "Branca", proficiency_header: "Proficiência Branca" },
        DemographicGroup { key: "PARDA", label: "Parda", proficiency_header: "Proficiência Parda" },
        DemographicGroup { key: "AMARELA", label: "Amarela", proficiency_header: "Proficiência Amarela" },
        DemographicGroup { key: "INDIGENA", label: "Indígena", proficiency_header: "Proficiência Indígena" },
    ],
};

pub const SOCIOECONOMIC: Demographic = Demographic {
    title: "Proficiência por nível socioeconômico (NSE)",
    file_name: "proficiencia_nse.csv",
    groups: &[
        DemographicGroup { key: "NSE1", label: "NSE 1", proficiency_header: "Proficiência NSE 1 (Mais Baixo)" },
        DemographicGroup { key: "NSE2", label: "NSE 2", proficiency_header: "Proficiência NSE 2" },
        DemographicGroup { key: "NSE3", label: "NSE 3", proficiency_header: "Proficiência NSE 3" },
        DemographicGroup { key: "NSE4", label: "NSE 4", proficiency_header: "Proficiência NSE 4 (Mais Alto)" },
    ],
};

pub const SEX: Demographic = Demographic {
    title: "Proficiência por sexo",
    file_name: "proficiencia_sexo.csv",
    groups: &[
        DemographicGroup { key: "FEMININO", label: "Feminino", proficiency_header: "Proficiência Feminino" },
        DemographicGroup { key: "MASCULINO", label: "Masculino", proficiency_header: "Proficiência Masculino" },
    ],
};

/// Fewer candidate columns than this and the breakdown is not shown.
const MIN_DEMOGRAPHIC_COLUMNS: usize = 4;

const DEMOGRAPHIC_IDS: [(&str, &str); 5] = [
    ("TP_ENTIDADE", "Tipo de Entidade Código"),
    ("DC_TIPO_ENTIDADE", "Tipo de Entidade"),
    ("NM_ENTIDADE", "Entidade"),
    (DISCIPLINE, "Componente Curricular"),
    (STAGE, "Etapa"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMeans {
    pub label: &'static str,
    pub proficiency: Option<f64>,
    pub rate: Option<f64>,
    pub count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemographicView {
    pub table: ExportTable,
    pub by_kind: Vec<(EntityKind, Vec<GroupMeans>)>,
}

impl Demographic {
    /// Candidate columns with their export headers: identifiers, then
    /// proficiencies, rates and counts.
    fn candidates(&self) -> Vec<(String, String)> {
        let mut columns: Vec<(String, String)> = DEMOGRAPHIC_IDS
            .iter()
            .map(|(c, h)| (c.to_string(), h.to_string()))
            .collect();
        for group in self.groups {
            columns.push((format!("VL_{}", group.key), group.proficiency_header.to_string()));
        }
        for group in self.groups {
            columns.push((format!("TX_{}", group.key), format!("Taxa {}", group.label)));
        }
        for group in self.groups {
            columns.push((format!("NU_{}", group.key), format!("Número {}", group.label)));
        }
        columns
    }

    pub fn build(&self, table: &Table) -> Section<DemographicView> {
        let available: Vec<(String, String)> = self
            .candidates()
            .into_iter()
            .filter(|(column, _)| table.has_column(column))
            .collect();
        if available.len() < MIN_DEMOGRAPHIC_COLUMNS {
            return Section::MissingColumns;
        }

        let values: Vec<&str> = available
            .iter()
            .map(|(column, _)| column.as_str())
            .filter(|column| !DEMOGRAPHIC_IDS.iter().any(|(id, _)| id == column))
            .collect();
        let rows: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| values.is_empty() || values.iter().any(|c| row_number(row, c).is_some()))
            .collect();
        if rows.is_empty() {
            return Section::NoRows;
        }

        let columns: Vec<&str> = available.iter().map(|(c, _)| c.as_str()).collect();
        let header_labels: Vec<String> = available.iter().map(|(_, h)| h.clone()).collect();
        let export = project(&rows, &columns, &header_labels, &values);

        let mut by_kind = Vec::new();
        for kind in EntityKind::ALL {
            let kind_rows: Vec<&&Row> = rows.iter().filter(|r| resolve_kind(r) == Some(kind)).collect();
            if kind_rows.is_empty() {
                continue;
            }
            let group_means = self
                .groups
                .iter()
                .map(|group| {
                    let mean_of = |prefix: &str| {
                        let column = format!("{}_{}", prefix, group.key);
                        let mut mean = Mean::default();
                        for row in &kind_rows {
                            mean.push(row_number(row, &column));
                        }
                        mean.value()
                    };
                    GroupMeans {
                        label: group.label,
                        proficiency: mean_of("VL"),
                        rate: mean_of("TX"),
                        count: mean_of("NU"),
                    }
                })
                .collect();
            by_kind.push((kind, group_means));
        }

        Section::Ready(DemographicView {
            table: export,
            by_kind,
        })
    }
}

// ----- Whole report -----

pub struct Report {
    pub participation: Section<ParticipationView>,
    pub proficiency: Section<ProficiencyView>,
    pub performance: Section<PerformanceView>,
    pub skills: Section<SkillView>,
    pub ethnicity: Section<DemographicView>,
    pub socioeconomic: Section<DemographicView>,
    pub sex: Section<DemographicView>,
}

impl Report {
    pub fn build(table: &Table) -> Self {
        Self {
            participation: participation(table),
            proficiency: proficiency(table),
            performance: performance(table),
            skills: skills(table),
            ethnicity: ETHNICITY.build(table),
            socioeconomic: SOCIOECONOMIC.build(table),
            sex: SEX.build(table),
        }
    }

    /// Title, file name and export of every view, `None` when the view is unavailable.
    pub fn exports(&self) -> Vec<(&'static str, &'static str, Option<&ExportTable>)> {
        vec![
            ("Taxa de participação", PARTICIPATION_FILE, self.participation.ready().map(|v| &v.table)),
            ("Proficiência média", PROFICIENCY_FILE, self.proficiency.ready().map(|v| &v.table)),
            ("Distribuição por padrão de desempenho", PERFORMANCE_FILE, self.performance.ready().map(|v| &v.table)),
            ("Taxa de acerto por habilidade", SKILLS_FILE, self.skills.ready().map(|v| &v.table)),
            (ETHNICITY.title, ETHNICITY.file_name, self.ethnicity.ready().map(|v| &v.table)),
            (SOCIOECONOMIC.title, SOCIOECONOMIC.file_name, self.socioeconomic.ready().map(|v| &v.table)),
            (SEX.title, SEX.file_name, self.sex.ready().map(|v| &v.table)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(rows: Vec<Value>) -> Table {
        Table::from_rows(rows.into_iter().map(|v| v.as_object().cloned().unwrap()).collect())
    }

    fn participation_row(tp: &str, name: &str, rate: Value, discipline: &str) -> Value {
        json!({
            "TP_ENTIDADE": tp,
            "NM_ENTIDADE": name,
            "QT_ALUNO_PREVISTO": "100",
            "QT_ALUNO_EFETIVO": 90,
            "TX_PARTICIPACAO": rate,
            "VL_FILTRO_DISCIPLINA": discipline,
            "VL_FILTRO_ETAPA": "5º Ano - Fundamental"
        })
    }

    #[test]
    fn filters_use_defaults_and_skip_excluded_stages() {
        let mut t = table(vec![
            json!({"VL_FILTRO_ETAPA": "ENSINO MEDIO - 2ª SERIE", "VL_FILTRO_DISCIPLINA": "Matemática", "VL_FILTRO_REDE": "Pública"}),
            json!({"VL_FILTRO_ETAPA": "9º Ano - Fundamental", "VL_FILTRO_DISCIPLINA": "Matemática", "VL_FILTRO_REDE": "Estadual"}),
            json!({"VL_FILTRO_ETAPA": "9º Ano - Fundamental", "VL_FILTRO_DISCIPLINA": "Língua Portuguesa", "VL_FILTRO_REDE": "Municipal"}),
            json!({"VL_FILTRO_ETAPA": "9º Ano - Fundamental", "VL_FILTRO_DISCIPLINA": "Língua Portuguesa", "VL_FILTRO_REDE": "Pública"}),
        ]);

        let applied = apply_filters(&mut t, &Selection::default()).unwrap();

        assert_eq!(applied.stage.as_deref(), Some("9º Ano - Fundamental"));
        assert_eq!(applied.discipline.as_deref(), Some("Língua Portuguesa"));
        assert_eq!(applied.network.as_deref(), Some("Municipal"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn unknown_requested_option_is_rejected() {
        let mut t = table(vec![json!({"VL_FILTRO_REDE": "Estadual"})]);
        let requested = Selection {
            network: Some("Federal".into()),
            ..Default::default()
        };
        let err = apply_filters(&mut t, &requested).unwrap_err();
        assert_eq!(err.options, vec!["Estadual"]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn request_for_absent_column_is_rejected() {
        let mut t = table(vec![json!({"VL_FILTRO_REDE": "Estadual"})]);
        let requested = Selection {
            stage: Some("9º Ano - Fundamental".into()),
            ..Default::default()
        };
        let err = apply_filters(&mut t, &requested).unwrap_err();
        assert_eq!(err.label, "Etapa");
        assert!(err.options.is_empty());

        let mut t = table(vec![json!({"VL_FILTRO_ETAPA": "ENSINO MEDIO - 3ª SERIE"})]);
        assert!(apply_filters(&mut t, &requested).is_err());
        assert_eq!(apply_filters(&mut t, &Selection::default()).unwrap(), Selection::default());
    }

    #[test]
    fn state_root_keeps_only_its_own_rows() {
        let mut t = table(vec![
            json!({"CD_ENTIDADE": "23"}),
            json!({"CD_ENTIDADE": 2301}),
            json!({"CD_ENTIDADE": 23}),
        ]);
        restrict_to_state(&mut t, "23");
        assert_eq!(t.len(), 2);

        let mut t = table(vec![json!({"CD_ENTIDADE": "23"}), json!({"CD_ENTIDADE": "2301"})]);
        restrict_to_state(&mut t, "2301");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn participation_gauge_takes_highest_rate_per_kind() {
        let t = table(vec![
            participation_row("01", "CEARA", json!("91.2"), "Língua Portuguesa"),
            participation_row("03", "ESCOLA A", json!(80), "Língua Portuguesa"),
            participation_row("03", "ESCOLA B", json!(95.5), "Língua Portuguesa"),
            participation_row("03", "ESCOLA C", json!(99), WRITTEN_PORTUGUESE),
            participation_row("03", "ESCOLA D", Value::Null, "Língua Portuguesa"),
        ]);

        let Section::Ready(view) = participation(&t) else {
            panic!("participation view missing");
        };
        assert_eq!(view.table.len(), 3);
        assert_eq!(view.table.rows[0][2], json!(100.0));
        assert_eq!(view.gauges.len(), 2);
        assert_eq!(view.gauges[0].kind, EntityKind::State);
        assert_eq!(view.gauges[1].entity, "ESCOLA B");
        assert_eq!(view.gauges[1].participation, 95.5);
        assert_eq!(view.gauges[1].effective, Some(90.0));
    }

    #[test]
    fn participation_requires_all_columns() {
        let t = table(vec![json!({"TP_ENTIDADE": "01", "NM_ENTIDADE": "CEARA"})]);
        assert_eq!(participation(&t), Section::MissingColumns);
    }

    #[test]
    fn proficiency_means_per_kind() {
        let row = |tp: &str, value: Value| {
            json!({
                "TP_ENTIDADE": tp,
                "NM_ENTIDADE": "X",
                "AVG_PROFICIENCIA_E1": value,
                "VL_FILTRO_DISCIPLINA": "Matemática",
                "VL_FILTRO_ETAPA": "9º Ano - Fundamental"
            })
        };
        let t = table(vec![row("03", json!(200)), row("03", json!("240")), row("01", json!("-"))]);

        let Section::Ready(view) = proficiency(&t) else {
            panic!("proficiency view missing");
        };
        assert_eq!(view.table.headers[0], "Entidade");
        assert_eq!(view.table.len(), 3);
        assert_eq!(view.means[0], (EntityKind::State, None));
        assert_eq!(view.means[3], (EntityKind::School, Some(220.0)));
    }

    #[test]
    fn performance_sorts_by_kind_and_aggregates_tiers() {
        let row = |tp: &str, desc: &str, name: &str, n1: Value, tx1: Value| {
            json!({
                "TP_ENTIDADE": tp, "DC_TIPO_ENTIDADE": desc, "NM_ENTIDADE": name,
                "NU_N01_TRI_E1": n1, "NU_N02_TRI_E1": 1, "NU_N03_TRI_E1": 1, "NU_N04_TRI_E1": 1, "NU_N05_TRI_E1": 1,
                "TX_N01_TRI_E1": tx1, "TX_N02_TRI_E1": 10, "TX_N03_TRI_E1": 20, "TX_N04_TRI_E1": 30, "TX_N05_TRI_E1": 40,
                "VL_FILTRO_DISCIPLINA": "Matemática", "VL_FILTRO_ETAPA": "9º Ano - Fundamental"
            })
        };
        let t = table(vec![
            row("03", "Escola", "ESCOLA B", json!(5), json!(10)),
            row("03", "Escola", "ESCOLA A", json!("3"), json!(30)),
            row("01", "Ceará", "CEARA", json!(1000), json!(5)),
            row("11", "Município", "MARACANAU", json!("-"), json!("-")),
        ]);

        let Section::Ready(view) = performance(&t) else {
            panic!("performance view missing");
        };
        let names: Vec<_> = view.table.rows.iter().map(|r| r[2].clone()).collect();
        assert_eq!(names, vec![json!("CEARA"), json!("MARACANAU"), json!("ESCOLA A"), json!("ESCOLA B")]);

        assert_eq!(view.distribution.len(), 3);
        let school = &view.distribution[2];
        assert_eq!(school.kind, EntityKind::School);
        assert_eq!(school.rates[0], Some(20.0));
        assert_eq!(school.counts[0], 8.0);
        assert_eq!(view.distribution[1].rates[0], None);
        assert_eq!(view.distribution[1].counts[0], 0.0);
    }

    #[test]
    fn skills_average_per_kind_and_code() {
        let row = |tp: Value, desc: &str, rate: Value, code: &str| {
            json!({
                "TP_ENTIDADE": tp, "DC_TIPO_ENTIDADE": desc, "NM_ENTIDADE": "X",
                "VL_FILTRO_DISCIPLINA": "Matemática", "VL_FILTRO_ETAPA": "9º Ano - Fundamental",
                "TX_ACERTO": rate, "DC_HABILIDADE": format!("Habilidade {}", code), "CD_HABILIDADE_MODELO_02": code
            })
        };
        let t = table(vec![
            row(json!("03"), "Escola", json!(60), "D02"),
            row(json!("03"), "Escola", json!("80"), "D02"),
            row(json!("03"), "Escola", json!(50), "D01"),
            row(Value::Null, "CREDE", json!(70), "D01"),
            row(json!("01"), "Ceará", json!("N/A"), "D01"),
        ]);

        let Section::Ready(view) = skills(&t) else {
            panic!("skills view missing");
        };
        assert_eq!(view.table.len(), 5);
        let bars: Vec<_> = view
            .accuracy
            .iter()
            .map(|a| (a.kind, a.code.as_str(), a.accuracy))
            .collect();
        assert_eq!(
            bars,
            vec![
                (EntityKind::Regional, "D01", 70.0),
                (EntityKind::School, "D01", 50.0),
                (EntityKind::School, "D02", 70.0),
            ]
        );
    }

    #[test]
    fn demographics_need_four_columns_and_drop_empty_rows() {
        let sparse = table(vec![json!({"TP_ENTIDADE": "03", "VL_FEMININO": 250, "NM_ENTIDADE": "X"})]);
        assert_eq!(SEX.build(&sparse), Section::MissingColumns);

        let t = table(vec![
            json!({"TP_ENTIDADE": "03", "NM_ENTIDADE": "A", "VL_FEMININO": "250", "VL_MASCULINO": 240, "TX_FEMININO": 51}),
            json!({"TP_ENTIDADE": "03", "NM_ENTIDADE": "B", "VL_FEMININO": 270, "VL_MASCULINO": "-", "TX_FEMININO": 49}),
            json!({"TP_ENTIDADE": "01", "NM_ENTIDADE": "C", "VL_FEMININO": "-", "VL_MASCULINO": null, "TX_FEMININO": "N/A"}),
        ]);
        let Section::Ready(view) = SEX.build(&t) else {
            panic!("sex view missing");
        };
        assert_eq!(
            view.table.headers,
            vec!["Tipo de Entidade Código", "Entidade", "Proficiência Feminino", "Proficiência Masculino", "Taxa Feminino"]
        );
        assert_eq!(view.table.len(), 2);
        assert_eq!(view.by_kind.len(), 1);
        let (kind, groups) = &view.by_kind[0];
        assert_eq!(*kind, EntityKind::School);
        assert_eq!(groups[0].proficiency, Some(260.0));
        assert_eq!(groups[1].proficiency, Some(240.0));
        assert_eq!(groups[0].rate, Some(50.0));
        assert_eq!(groups[0].count, None);
    }

    #[test]
    fn socioeconomic_headers_mark_extremes() {
        let t = table(vec![json!({
            "TP_ENTIDADE": "02", "DC_TIPO_ENTIDADE": "CREDE", "NM_ENTIDADE": "CREDE 1",
            "VL_NSE1": 200, "VL_NSE4": 260, "NU_NSE1": 10
        })]);
        let Section::Ready(view) = SOCIOECONOMIC.build(&t) else {
            panic!("nse view missing");
        };
        assert!(view.table.headers.contains(&"Proficiência NSE 1 (Mais Baixo)".to_string()));
        assert!(view.table.headers.contains(&"Proficiência NSE 4 (Mais Alto)".to_string()));
        assert!(view.table.headers.contains(&"Número NSE 1".to_string()));
        assert_eq!(view.by_kind[0].0, EntityKind::Regional);
    }

    #[test]
    fn report_lists_every_export() {
        let report = Report::build(&table(vec![json!({"NM_ENTIDADE": "X"})]));
        let exports = report.exports();
        assert_eq!(exports.len(), 7);
        assert!(exports.iter().all(|(_, _, table)| table.is_none()));
    }
}
