use crate::models::Table;
use serde_json::Value;

const DISCIPLINES: &[(&str, &str)] = &[("LP", "Língua Portuguesa"), ("MT", "Matemática")];

const NETWORKS: &[(&str, &str)] = &[
    ("ESTADUAL", "Estadual"),
    ("MUNICIPAL", "Municipal"),
    ("PUBLICA", "Pública"),
    ("PÚBLICA", "Pública"),
];

const STAGES: &[(&str, &str)] = &[
    ("ENSINO FUNDAMENTAL DE 9 ANOS - 2º ANO", "2º Ano - Fundamental"),
    ("ENSINO FUNDAMENTAL DE 9 ANOS - 5º ANO", "5º Ano - Fundamental"),
    ("ENSINO FUNDAMENTAL DE 9 ANOS - 9º ANO", "9º Ano - Fundamental"),
];

const ENTITY_TYPES: &[(&str, &str)] = &[
    ("ESTADO", "Ceará"),
    ("REGIONAL", "CREDE"),
    ("MUNICIPIO", "Município"),
    ("ESCOLA", "Escola"),
];

const SUBSTITUTIONS: &[(&str, &[(&str, &str)])] = &[
    ("VL_FILTRO_DISCIPLINA", DISCIPLINES),
    ("VL_FILTRO_REDE", NETWORKS),
    ("VL_FILTRO_ETAPA", STAGES),
    ("DC_TIPO_ENTIDADE", ENTITY_TYPES),
];

/// Replace raw API codes with display labels. Only exact matches are replaced.
pub fn apply_substitutions(table: &mut Table) {
    for (column, mapping) in SUBSTITUTIONS {
        if !table.has_column(column) {
            continue;
        }
        for row in &mut table.rows {
            if let Some(Value::String(raw)) = row.get_mut(*column) {
                if let Some((_, label)) = mapping.iter().find(|(code, _)| *code == raw.as_str()) {
                    *raw = label.to_string();
                }
            }
        }
    }
}
